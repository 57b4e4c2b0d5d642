//! Model downloading into the local cache
//!
//! Downloads stream into a temporary file inside the cache directory while
//! the SHA-256 digest is computed, then the file is renamed into place. An
//! interrupted download never leaves a file under the model's name.

use crate::cache::ModelCache;
use crate::error::{ConvertError, Result};
use crate::models::{find_known_model, KnownModel};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn new(show: bool) -> Self {
        #[cfg(feature = "cli")]
        {
            if show {
                let pb = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                return Self::Indicatif(pb);
            }
        }
        #[cfg(not(feature = "cli"))]
        let _ = show;
        Self::NoOp
    }

    fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into the given cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ConvertError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a known model by name unless it is already cached
    ///
    /// # Errors
    /// - Unknown model name
    /// - Network, I/O or integrity failures (see [`ModelDownloader::download_url`])
    pub async fn ensure_model(&self, name: &str, show_progress: bool) -> Result<PathBuf> {
        let known = find_known_model(name).ok_or_else(|| {
            let names: Vec<&str> = crate::models::known_models()
                .iter()
                .map(|model| model.name)
                .collect();
            ConvertError::invalid_config(format!(
                "Unknown model '{name}'. Downloadable models: {names:?}"
            ))
        })?;

        if self.cache.is_cached(known.name) {
            log::info!("Model already cached: {}", known.name);
            return Ok(self.cache.model_path(known.name));
        }

        self.download_known(known, show_progress).await
    }

    async fn download_known(&self, model: &KnownModel, show_progress: bool) -> Result<PathBuf> {
        self.download_url(model.name, model.url, model.sha256, show_progress)
            .await
    }

    /// Download `url` into the cache as `name`, replacing any existing file
    ///
    /// # Errors
    /// - HTTP client or status errors
    /// - I/O errors while writing the temporary file or renaming it
    /// - SHA-256 mismatch against `expected_sha256`
    pub async fn download_url(
        &self,
        name: &str,
        url: &str,
        expected_sha256: Option<&str>,
        show_progress: bool,
    ) -> Result<PathBuf> {
        validate_model_url(url)?;
        log::info!("Downloading model '{name}' from: {url}");

        let progress = ProgressIndicator::new(show_progress);
        progress.set_message(format!("Downloading {name}"));

        let final_path = self.cache.model_path(name);
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{name}-"))
            .suffix(".part")
            .tempfile_in(self.cache.cache_dir())
            .map_err(|e| {
                ConvertError::file_io_error("create temporary download file", self.cache.cache_dir(), &e)
            })?;

        let digest = match self.stream_to_file(url, temp.path(), &progress).await {
            Ok(digest) => digest,
            Err(e) => {
                progress.finish_with_message("❌ Download failed".to_string());
                return Err(e);
            },
        };

        if let Some(expected) = expected_sha256 {
            if !digest.eq_ignore_ascii_case(expected) {
                progress.finish_with_message("❌ Integrity check failed".to_string());
                return Err(ConvertError::model(format!(
                    "SHA-256 mismatch for '{name}': expected {expected}, got {digest}"
                )));
            }
        }

        temp.persist(&final_path).map_err(|e| {
            ConvertError::file_io_error("move downloaded model to cache", &final_path, &e.error)
        })?;

        progress.finish_with_message(format!("✅ Downloaded {name}"));
        log::info!("Cached model '{name}' at {} (sha256 {digest})", final_path.display());
        Ok(final_path)
    }

    /// Stream the response body into `local_path`, returning its hex SHA-256
    async fn stream_to_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ConvertError::network_error(&format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(ConvertError::network_error(
                &format!("Download of {url} failed"),
                format!("HTTP {}", response.status()),
            ));
        }

        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| ConvertError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| ConvertError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| ConvertError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            progress.set_position(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| ConvertError::file_io_error("flush file", local_path, &e))?;

        if downloaded == 0 {
            return Err(ConvertError::network_error(
                &format!("Download of {url} failed"),
                "empty response body",
            ));
        }

        log::debug!("Downloaded {downloaded} bytes to {}", local_path.display());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Hex SHA-256 of a file on disk
///
/// # Errors
/// - Failed to read the file
pub fn sha256_file(path: &Path) -> Result<String> {
    let contents =
        fs::read(path).map_err(|e| ConvertError::file_io_error("read file for verification", path, &e))?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Validate that a URL can be used as a model download source
///
/// # Errors
/// - Empty URL or a scheme other than `https`
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ConvertError::invalid_config("Model URL cannot be empty"));
    }

    let Some(rest) = url.strip_prefix("https://") else {
        return Err(ConvertError::invalid_config(format!(
            "Unsupported URL: {url}. Models are only downloaded over https"
        )));
    };

    if rest.split('/').next().map_or(true, str::is_empty) || !rest.contains('/') {
        return Err(ConvertError::invalid_config(format!(
            "Invalid model URL: {url}. Expected https://host/path/model.onnx"
        )));
    }

    Ok(())
}
