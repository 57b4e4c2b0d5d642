//! Local cache of downloaded segmentation models
//!
//! Models are stored as flat `<name>.onnx` files in a per-user cache
//! directory:
//! - Linux: `~/.cache/convertall/models/`
//! - macOS: `~/Library/Caches/convertall/models/`
//! - Windows: `%LOCALAPPDATA%/convertall/models/`
//!
//! `CONVERTALL_MODEL_DIR` overrides the location.

use crate::error::{ConvertError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the model cache directory
pub const MODEL_DIR_ENV: &str = "CONVERTALL_MODEL_DIR";

const MODEL_EXTENSION: &str = "onnx";

/// Information about a cached model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating the directory when missing
    ///
    /// # Errors
    /// - Failed to determine the user cache directory
    /// - Failed to create the cache directory
    pub fn new() -> Result<Self> {
        Self::with_dir(Self::default_cache_dir()?)
    }

    /// Open a cache rooted at an explicit directory
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_dir<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                ConvertError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }
        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(MODEL_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                ConvertError::invalid_config(format!(
                    "Failed to determine cache directory. Set {MODEL_DIR_ENV}."
                ))
            })?
            .join("convertall")
            .join("models"))
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path where the named model lives (may not exist)
    #[must_use]
    pub fn model_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{name}.{MODEL_EXTENSION}"))
    }

    /// Whether a non-empty model file exists under this name
    #[must_use]
    pub fn is_cached(&self, name: &str) -> bool {
        fs::metadata(self.model_path(name)).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
    }

    /// List cached models sorted by name
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn list(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| ConvertError::file_io_error("read cache directory", &self.cache_dir, &e))?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                ConvertError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();

            let is_model = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION));
            if !is_model || !path.is_file() {
                continue;
            }

            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            models.push(CachedModelInfo {
                name: name.to_string(),
                path: path.clone(),
                size_bytes,
            });
        }

        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    /// Remove a cached model
    ///
    /// Returns `false` when the model was not cached.
    ///
    /// # Errors
    /// - Failed to remove the model file
    pub fn clear(&self, name: &str) -> Result<bool> {
        let path = self.model_path(name);
        if !path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {name}");
        fs::remove_file(&path)
            .map_err(|e| ConvertError::file_io_error("remove cached model", &path, &e))?;
        Ok(true)
    }

    /// Remove every cached model, returning the removed names
    ///
    /// # Errors
    /// - Failed to list or remove models
    pub fn clear_all(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for model in self.list()? {
            if self.clear(&model.name)? {
                removed.push(model.name);
            }
        }
        Ok(removed)
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
