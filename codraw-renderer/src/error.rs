//! Renderer error types.

use thiserror::Error;

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while decoding, composing or encoding images.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Input bytes or data URI could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Encoding the output image failed.
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// The composed SVG could not be parsed or rasterized.
    #[error("Rasterization failed: {0}")]
    Raster(String),
}
