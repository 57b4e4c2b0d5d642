//! Inference engines for the segmentation model
//!
//! - ONNX Runtime backend (GPU acceleration through execution providers)
//! - Tract backend (pure Rust, no external dependencies)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

use crate::config::{BackendType, ModelConfig};
use crate::error::Result;
use crate::inference::InferenceBackend;
use crate::models::ModelManager;

/// Load the configured backend for a resolved model
///
/// # Errors
/// - Requested backend not compiled in
/// - Model loading failures inside the backend
pub fn create_backend(
    config: &ModelConfig,
    manager: &ModelManager,
) -> Result<Box<dyn InferenceBackend>> {
    log::debug!(
        "Creating {} backend for {}",
        config.backend,
        manager.source().display_name()
    );

    match config.backend {
        BackendType::Onnx => {
            #[cfg(feature = "onnx")]
            {
                Ok(Box::new(OnnxBackend::load(manager, config)?))
            }
            #[cfg(not(feature = "onnx"))]
            {
                Err(crate::error::ConvertError::invalid_config(
                    "ONNX backend not compiled in (enable the `onnx` feature)",
                ))
            }
        },
        BackendType::Tract => {
            #[cfg(feature = "tract")]
            {
                Ok(Box::new(TractBackend::load(manager)?))
            }
            #[cfg(not(feature = "tract"))]
            {
                Err(crate::error::ConvertError::invalid_config(
                    "Tract backend not compiled in (enable the `tract` feature)",
                ))
            }
        },
    }
}

/// Backends compiled into this build
#[must_use]
pub fn available_backends() -> Vec<BackendType> {
    let mut backends = Vec::new();
    if cfg!(feature = "onnx") {
        backends.push(BackendType::Onnx);
    }
    if cfg!(feature = "tract") {
        backends.push(BackendType::Tract);
    }
    backends
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelCache;
    use crate::error::ConvertError;
    use crate::models::ModelSource;
    use tempfile::TempDir;

    #[test]
    fn test_available_backends_matches_features() {
        let backends = available_backends();
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
        assert_eq!(backends.contains(&BackendType::Tract), cfg!(feature = "tract"));
    }

    #[test]
    fn test_create_backend_rejects_invalid_model() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path()).unwrap();
        let model_path = temp.path().join("broken.onnx");
        std::fs::write(&model_path, b"not an onnx graph").unwrap();
        let manager = ModelManager::resolve(&ModelSource::External(model_path), &cache).unwrap();

        for backend in available_backends() {
            let config = ModelConfig::default().with_backend(backend);
            let err = create_backend(&config, &manager).unwrap_err();
            assert!(matches!(err, ConvertError::Model(_)), "{backend}: {err}");
        }
    }
}
