//! Segmentation model sources and their preprocessing parameters

use crate::cache::ModelCache;
use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Model used when nothing else is requested (smallest accurate rembg model)
pub const DEFAULT_MODEL: &str = "silueta";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How the model input tensor is built from an image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in the 0-1 range
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [320, 320],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        }
    }
}

impl PreprocessingConfig {
    /// Validate sizes and normalization values
    ///
    /// # Errors
    /// - Zero or non-square target size
    /// - Non-positive or non-finite standard deviation
    pub fn validate(&self) -> Result<()> {
        let [height, width] = self.target_size;
        if height == 0 || width == 0 || height != width {
            return Err(ConvertError::invalid_config(format!(
                "Model target size must be square and non-zero, got {height}x{width}"
            )));
        }
        if self
            .normalization_std
            .iter()
            .any(|std| !std.is_finite() || *std <= 0.0)
        {
            return Err(ConvertError::invalid_config(format!(
                "Normalization std must be positive, got {:?}",
                self.normalization_std
            )));
        }
        Ok(())
    }
}

/// A model that can be fetched by name
#[derive(Debug, Clone, Copy)]
pub struct KnownModel {
    pub name: &'static str,
    pub url: &'static str,
    /// Expected SHA-256 of the file, when pinned
    pub sha256: Option<&'static str>,
    pub preprocessing: PreprocessingConfig,
}

const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        name: "silueta",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/silueta.onnx",
        sha256: None,
        preprocessing: PreprocessingConfig {
            target_size: [320, 320],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        },
    },
    KnownModel {
        name: "u2netp",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2netp.onnx",
        sha256: None,
        preprocessing: PreprocessingConfig {
            target_size: [320, 320],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        },
    },
    KnownModel {
        name: "u2net",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx",
        sha256: None,
        preprocessing: PreprocessingConfig {
            target_size: [320, 320],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        },
    },
    KnownModel {
        name: "isnet-general-use",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-general-use.onnx",
        sha256: None,
        preprocessing: PreprocessingConfig {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        },
    },
];

/// All models that can be downloaded by name
#[must_use]
pub fn known_models() -> &'static [KnownModel] {
    KNOWN_MODELS
}

/// Look up a downloadable model by name (case-insensitive)
#[must_use]
pub fn find_known_model(name: &str) -> Option<&'static KnownModel> {
    KNOWN_MODELS
        .iter()
        .find(|model| model.name.eq_ignore_ascii_case(name))
}

/// Where the model weights come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// An `.onnx` file on disk
    External(PathBuf),
    /// A model stored in the local cache under its name
    Cached(String),
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::Cached(DEFAULT_MODEL.to_string())
    }
}

impl ModelSource {
    /// Interpret a CLI-style model argument: existing paths and `.onnx`
    /// names are files, anything else is a cached model name
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let path = Path::new(value);
        let looks_like_file = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if looks_like_file || path.is_file() {
            Self::External(path.to_path_buf())
        } else {
            Self::Cached(value.to_string())
        }
    }

    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::External(path) => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Self::Cached(name) => format!("cached:{name}"),
        }
    }
}

/// Resolves a [`ModelSource`] to weights on disk and the matching preprocessing
#[derive(Debug, Clone)]
pub struct ModelManager {
    source: ModelSource,
    model_path: PathBuf,
    preprocessing: PreprocessingConfig,
}

impl ModelManager {
    /// Resolve a model source against the cache
    ///
    /// External files may carry a sidecar `<stem>.json` holding a serialized
    /// [`PreprocessingConfig`]; without one the parameters of a known model
    /// with the same stem are used, falling back to the silueta defaults.
    ///
    /// # Errors
    /// - External model file missing
    /// - Cached model not present in the cache
    /// - Unreadable or invalid sidecar configuration
    pub fn resolve(source: &ModelSource, cache: &ModelCache) -> Result<Self> {
        let (model_path, preprocessing) = match source {
            ModelSource::External(path) => {
                if !path.is_file() {
                    return Err(ConvertError::model(format!(
                        "Model file not found: {}",
                        path.display()
                    )));
                }
                let preprocessing = match Self::read_sidecar(path)? {
                    Some(config) => config,
                    None => Self::preprocessing_for_stem(path),
                };
                (path.clone(), preprocessing)
            },
            ModelSource::Cached(name) => {
                if !cache.is_cached(name) {
                    let available: Vec<String> =
                        cache.list()?.into_iter().map(|model| model.name).collect();
                    return Err(ConvertError::model(format!(
                        "Model '{name}' not found in cache {}. Download it first (--download-model). Cached models: {available:?}",
                        cache.cache_dir().display()
                    )));
                }
                let preprocessing = find_known_model(name)
                    .map(|known| known.preprocessing)
                    .unwrap_or_default();
                (cache.model_path(name), preprocessing)
            },
        };

        preprocessing.validate()?;
        log::debug!(
            "Resolved model {} -> {} (input {}x{})",
            source.display_name(),
            model_path.display(),
            preprocessing.target_size[1],
            preprocessing.target_size[0]
        );

        Ok(Self {
            source: source.clone(),
            model_path,
            preprocessing,
        })
    }

    fn read_sidecar(model_path: &Path) -> Result<Option<PreprocessingConfig>> {
        let sidecar = model_path.with_extension("json");
        if !sidecar.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&sidecar)
            .map_err(|e| ConvertError::file_io_error("read model config", &sidecar, &e))?;
        let config = serde_json::from_str(&content).map_err(|e| {
            ConvertError::model(format!("Failed to parse {}: {e}", sidecar.display()))
        })?;
        Ok(Some(config))
    }

    fn preprocessing_for_stem(model_path: &Path) -> PreprocessingConfig {
        model_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(find_known_model)
            .map(|known| known.preprocessing)
            .unwrap_or_default()
    }

    /// Read the model weights
    ///
    /// # Errors
    /// - File I/O errors when reading the model file
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_path)
            .map_err(|e| ConvertError::file_io_error("read model file", &self.model_path, &e))
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    #[must_use]
    pub fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    #[must_use]
    pub fn source(&self) -> &ModelSource {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_models() {
        let silueta = find_known_model("SILUETA").unwrap();
        assert_eq!(silueta.name, DEFAULT_MODEL);
        assert_eq!(silueta.preprocessing.target_size, [320, 320]);
        assert!(silueta.url.ends_with("silueta.onnx"));
        assert!(find_known_model("nope").is_none());
        assert!(known_models().iter().all(|m| m.preprocessing.validate().is_ok()));
    }

    #[test]
    fn test_model_source_parse() {
        assert_eq!(
            ModelSource::parse("models/custom.onnx"),
            ModelSource::External(PathBuf::from("models/custom.onnx"))
        );
        assert_eq!(
            ModelSource::parse("u2netp"),
            ModelSource::Cached("u2netp".to_string())
        );
        assert_eq!(ModelSource::default(), ModelSource::Cached("silueta".to_string()));
    }

    #[test]
    fn test_model_source_display_name() {
        let cached = ModelSource::Cached("silueta".to_string());
        assert_eq!(cached.display_name(), "cached:silueta");

        let external = ModelSource::External(PathBuf::from("/path/to/model.onnx"));
        assert_eq!(external.display_name(), "external:model.onnx");

        let external_no_name = ModelSource::External(PathBuf::from("/"));
        assert_eq!(external_no_name.display_name(), "external:");
    }

    #[test]
    fn test_preprocessing_validation() {
        assert!(PreprocessingConfig::default().validate().is_ok());

        let config = PreprocessingConfig {
            target_size: [320, 256],
            ..PreprocessingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PreprocessingConfig {
            normalization_std: [0.2, 0.0, 0.2],
            ..PreprocessingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_missing_external_model() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path()).unwrap();
        let source = ModelSource::External(temp.path().join("missing.onnx"));
        let err = ModelManager::resolve(&source, &cache).unwrap_err();
        assert!(matches!(err, ConvertError::Model(_)));
    }

    #[test]
    fn test_resolve_external_with_sidecar() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path().join("cache")).unwrap();
        let model_path = temp.path().join("custom.onnx");
        fs::write(&model_path, b"weights").unwrap();

        let sidecar = PreprocessingConfig {
            target_size: [512, 512],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [0.5, 0.5, 0.5],
        };
        fs::write(
            temp.path().join("custom.json"),
            serde_json::to_string(&sidecar).unwrap(),
        )
        .unwrap();

        let manager =
            ModelManager::resolve(&ModelSource::External(model_path.clone()), &cache).unwrap();
        assert_eq!(manager.preprocessing_config(), &sidecar);
        assert_eq!(manager.model_path(), model_path.as_path());
        assert_eq!(manager.load_model().unwrap(), b"weights");
    }

    #[test]
    fn test_resolve_external_known_stem() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path().join("cache")).unwrap();
        let model_path = temp.path().join("isnet-general-use.onnx");
        fs::write(&model_path, b"weights").unwrap();

        let manager = ModelManager::resolve(&ModelSource::External(model_path), &cache).unwrap();
        assert_eq!(manager.preprocessing_config().target_size, [1024, 1024]);
    }

    #[test]
    fn test_resolve_cached_model() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(temp.path()).unwrap();

        let source = ModelSource::Cached("silueta".to_string());
        assert!(ModelManager::resolve(&source, &cache).is_err());

        fs::write(cache.model_path("silueta"), b"weights").unwrap();
        let manager = ModelManager::resolve(&source, &cache).unwrap();
        assert_eq!(manager.preprocessing_config(), &PreprocessingConfig::default());
        assert_eq!(manager.source(), &source);
    }
}
