//! Shared, lazily loaded segmentation model handle
//!
//! The model is loaded on first use, exactly once even when several requests
//! arrive together, and then shared read-only for the lifetime of the handle.
//! Cloning a [`SharedSegmenter`] shares the same slot.

use crate::backends::create_backend;
use crate::cache::ModelCache;
use crate::config::ModelConfig;
use crate::error::Result;
use crate::models::ModelManager;
use crate::segmentation::{ModelSegmenter, SegmentationModel};
use instant::Instant;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

type Loader = dyn Fn() -> Result<Arc<dyn SegmentationModel>> + Send + Sync;

/// Once-initialized segmentation model shared between requests
#[derive(Clone)]
pub struct SharedSegmenter {
    slot: Arc<OnceCell<Arc<dyn SegmentationModel>>>,
    loader: Arc<Loader>,
}

impl SharedSegmenter {
    /// Create a handle that runs `loader` on first use.
    ///
    /// A failed load is not cached; the next request tries again.
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SegmentationModel>> + Send + Sync + 'static,
    {
        Self {
            slot: Arc::new(OnceCell::new()),
            loader: Arc::new(loader),
        }
    }

    /// Wrap an already loaded model
    pub fn from_model(model: Arc<dyn SegmentationModel>) -> Self {
        let slot = OnceCell::new();
        // Freshly created cell, cannot already be set
        let _ = slot.set(Arc::clone(&model));
        Self {
            slot: Arc::new(slot),
            loader: Arc::new(move || Ok(Arc::clone(&model))),
        }
    }

    /// Handle that resolves the model from `cache` and loads the configured
    /// backend on first use
    pub fn from_model_config(config: ModelConfig, cache: ModelCache) -> Self {
        Self::new(move || {
            let load_start = Instant::now();
            let manager = ModelManager::resolve(&config.source, &cache)?;
            let backend = create_backend(&config, &manager)?;
            tracing::info!(
                model = %config.source.display_name(),
                backend = backend.name(),
                elapsed_ms = load_start.elapsed().as_millis() as u64,
                "Segmentation model loaded"
            );
            Ok(Arc::new(ModelSegmenter::new(backend)) as Arc<dyn SegmentationModel>)
        })
    }

    /// Return the loaded model, loading it if this is the first call
    ///
    /// # Errors
    /// - Whatever the loader reports (missing model, backend failures)
    pub fn get_or_init(&self) -> Result<Arc<dyn SegmentationModel>> {
        self.slot
            .get_or_try_init(|| {
                tracing::debug!("Loading segmentation model (first use)");
                (self.loader)()
            })
            .map(Arc::clone)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl fmt::Debug for SharedSegmenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSegmenter")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    struct EchoModel;

    impl SegmentationModel for EchoModel {
        fn segment(&self, encoded: &[u8]) -> Result<Vec<u8>> {
            Ok(encoded.to_vec())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_loader_runs_once_under_concurrent_first_use() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let shared = SharedSegmenter::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(EchoModel) as Arc<dyn SegmentationModel>)
        });

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    shared.get_or_init().unwrap()
                })
            })
            .collect();

        let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(shared.is_loaded());
    }

    #[test]
    fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let shared = SharedSegmenter::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ConvertError::model("weights missing"))
            } else {
                Ok(Arc::new(EchoModel) as Arc<dyn SegmentationModel>)
            }
        });

        assert!(shared.get_or_init().is_err());
        assert!(!shared.is_loaded());
        assert_eq!(shared.get_or_init().unwrap().name(), "echo");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_model_is_preloaded() {
        let shared = SharedSegmenter::from_model(Arc::new(EchoModel));
        assert!(shared.is_loaded());
        assert_eq!(shared.get_or_init().unwrap().segment(b"abc").unwrap(), b"abc");
    }

    #[test]
    fn test_missing_cached_model_reports_model_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path()).unwrap();
        let shared = SharedSegmenter::from_model_config(ModelConfig::default(), cache);

        let err = shared.get_or_init().err().unwrap();
        assert!(matches!(err, ConvertError::Model(_)));
    }
}
