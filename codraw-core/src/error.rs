//! Error types for canvas operations.

use thiserror::Error;

/// Result type for canvas operations.
pub type CanvasResult<T> = Result<T, CanvasError>;

/// Errors that can occur in canvas operations.
#[derive(Debug, Error)]
pub enum CanvasError {
    /// Shape not found in scene.
    #[error("Shape not found: {0}")]
    ShapeNotFound(String),

    /// A shape with the same id is already on the canvas.
    #[error("Shape already exists: {0}")]
    DuplicateShape(String),

    /// Invalid shape id format.
    #[error("Invalid shape id: {0}")]
    InvalidShapeId(String),

    /// Scene serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing a scene file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
