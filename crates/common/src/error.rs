//! Error types shared across Capstan crates.

use std::path::PathBuf;

/// Top-level error type for Capstan operations.
#[derive(Debug, thiserror::Error)]
pub enum CapstanError {
    #[error("Invalid session state: {message}")]
    InvalidState { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Capture start failed: {message}")]
    CaptureStart { message: String },

    #[error("Frame write failed: {message}")]
    EncodeWrite { message: String },

    #[error("Mux failed: {message}")]
    Mux { message: String },

    #[error("Finalize failed for {path}: {message}")]
    FinalizeIo { path: PathBuf, message: String },

    #[error("Encoder unavailable: {message}")]
    EncoderUnavailable { message: String },

    #[error("{process} did not exit within {timeout_secs}s")]
    ProcessTimeout { process: String, timeout_secs: u64 },

    #[error("Platform error: {message}")]
    Platform { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CapstanError.
pub type CapstanResult<T> = Result<T, CapstanError>;

impl CapstanError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn capture_start(msg: impl Into<String>) -> Self {
        Self::CaptureStart {
            message: msg.into(),
        }
    }

    pub fn encode_write(msg: impl Into<String>) -> Self {
        Self::EncodeWrite {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn finalize_io(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::FinalizeIo {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn encoder_unavailable(msg: impl Into<String>) -> Self {
        Self::EncoderUnavailable {
            message: msg.into(),
        }
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error is fatal to starting a session.
    ///
    /// Streaming and mux failures are recovered locally and never reach
    /// the session start path.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::Configuration { .. }
                | Self::CaptureStart { .. }
                | Self::EncoderUnavailable { .. }
                | Self::Platform { .. }
                | Self::Unsupported { .. }
        )
    }
}
