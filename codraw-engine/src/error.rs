//! Error types for the engine.

use std::time::Duration;

use codraw_core::CanvasError;
use codraw_renderer::RenderError;
use thiserror::Error;

/// Errors from the remote classify/generate and analysis endpoints.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The configured base URL is invalid.
    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed (connection, timeout, etc.).
    #[error("provider HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The response body did not match the expected shape.
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Returns true if this error is transient (connection failures,
    /// throttling, server errors).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidUrl(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Why a generation request was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Refusal {
    /// Another generation is running.
    #[error("A generation is already in progress")]
    InFlight,
    /// A voice session owns the canvas.
    #[error("Voice session is active")]
    VoiceActive,
    /// Auto mode is switched off.
    #[error("Auto mode is disabled")]
    AutoDisabled,
    /// Nothing on the canvas to help with.
    #[error("Canvas is empty")]
    EmptyCanvas,
}

/// Errors from the generation pipeline.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The entry guard refused the request.
    #[error("request refused: {0}")]
    Refused(#[from] Refusal),
    /// The remote call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Snapshot or image processing failed.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// Writing the staged shape failed.
    #[error(transparent)]
    Canvas(#[from] CanvasError),
    /// A drawing answer carried neither an image nor any text.
    #[error("no image returned")]
    NoImage,
    /// The remote call exceeded the hard timeout.
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    /// A blocking image task panicked or was aborted.
    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SolverError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Errors from the voice session.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// `start_session` was called while a session is live.
    #[error("voice session already active")]
    AlreadyActive,
    /// The microphone could not be acquired.
    #[error("microphone unavailable: {0}")]
    Microphone(String),
    /// The realtime transport failed or closed.
    #[error("realtime transport failed: {0}")]
    Transport(String),
    /// A control event could not be encoded or decoded.
    #[error("invalid realtime event: {0}")]
    Protocol(#[from] serde_json::Error),
    /// The remote side reported an error.
    #[error("realtime error: {0}")]
    Remote(String),
}

/// Errors from a voice tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool name is not registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// The arguments did not parse.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The configured base URL is invalid.
    #[error("invalid document store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed.
    #[error("document store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The store cancelled the write for running too long.
    #[error("statement timeout")]
    StatementTimeout,
    /// The store rejected the write.
    #[error("document store returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// Serializing the canvas failed.
    #[error(transparent)]
    Canvas(#[from] CanvasError),
}

/// Errors while wiring the engine from configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The provider client could not be built.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The document store client could not be built.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable held a value that could not be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },
}
