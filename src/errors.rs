use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Structured error types for the tiled segmentation pipeline.
///
/// The first group of variants covers the pipeline run itself (model artifact,
/// tile tasks, interruption); their `Display` output is the user-facing message
/// handed to the caller's error callback. The second group covers the
/// surrounding application (configuration, filesystem, image I/O).
///
/// Every variant is `Send + Sync` so a failure can travel from a worker thread
/// back to the orchestration thread and on to the caller's thread.
#[derive(Error, Debug)]
pub enum TileSegError {
    #[error("Model file not exists or cannot be opened: {path:?}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model file is badly encoded: {path:?} ({reason})")]
    ArtifactFormat { path: PathBuf, reason: String },

    /// The underlying message is reported verbatim.
    #[error("{message}")]
    TaskExecution { index: usize, message: String },

    #[error("Tile task {index} did not finish within {timeout:?}")]
    TaskTimeout { index: usize, timeout: Duration },

    #[error("A thread was interrupted")]
    Interrupted,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed: {message}")]
    Model { operation: String, message: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TileSegError>;

impl TileSegError {
    /// Whether the failure ended a pipeline run (as opposed to an I/O or
    /// configuration problem around it).
    pub const fn is_run_failure(&self) -> bool {
        matches!(
            self,
            Self::Artifact { .. }
                | Self::ArtifactFormat { .. }
                | Self::TaskExecution { .. }
                | Self::TaskTimeout { .. }
                | Self::Interrupted
        )
    }

    pub(crate) fn model(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Model {
            operation: operation.into(),
            message: err.to_string(),
        }
    }
}

/// Convert anyhow errors to configuration errors.
///
/// Some callers hand us `anyhow::Error` values; at the library boundary they
/// are folded into the configuration category.
impl From<anyhow::Error> for TileSegError {
    fn from(err: anyhow::Error) -> Self {
        TileSegError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should construct
/// `TileSegError::FileSystem` directly.
impl From<std::io::Error> for TileSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for TileSegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for TileSegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for TileSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}
