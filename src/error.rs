//! Error types for background removal operations

use crate::types::PipelineState;
use thiserror::Error;

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Error taxonomy for the background removal pipeline
///
/// Every pipeline stage fails fast with exactly one of these. Running out of
/// size budget in the compressor is deliberately absent: it is not an error.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input bytes are not a readable image
    #[error("Decode failure: {0}")]
    Decode(String),

    /// The segmentation model failed or returned unparsable bytes
    #[error("Segmentation failure: {0}")]
    Segmentation(String),

    /// Encoding or writing the final output failed
    #[error("Encode failure: {0}")]
    Encode(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unsupported file format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Model download errors
    #[error("Network error: {0}")]
    Network(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),

    /// An error tagged with the pipeline stage it originated from
    #[error("{stage} failed: {source}")]
    Stage {
        stage: PipelineState,
        #[source]
        source: Box<ConvertError>,
    },
}

impl ConvertError {
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a network error with the failing operation as context
    pub fn network_error<E: std::fmt::Display>(context: &str, error: E) -> Self {
        Self::Network(format!("{context}: {error}"))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {rec}"),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range}).{recommendation}"
        ))
    }

    /// Tag this error with the stage it originated from.
    ///
    /// Already-tagged errors keep their original stage.
    #[must_use]
    pub fn at_stage(self, stage: PipelineState) -> Self {
        match self {
            tagged @ Self::Stage { .. } => tagged,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was tagged with, if any
    #[must_use]
    pub fn stage(&self) -> Option<PipelineState> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The underlying error with any stage tag stripped
    #[must_use]
    pub fn root(&self) -> &ConvertError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Pipeline stages never retry; only model downloads are worth another try.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::Network(_))
    }
}
