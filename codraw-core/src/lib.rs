//! # Codraw Core
//!
//! Canvas document model for the AI co-drawing engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 CanvasStore                 │
//! ├─────────────────────────────────────────────┤
//! │  Scene           │  Layer Registry          │
//! │  - Shapes        │  - Ordered layers        │
//! │  - Stack order   │  - Visibility / lock     │
//! │  - Page metadata │  - Tag projection index  │
//! ├─────────────────────────────────────────────┤
//! │  Mutation events │  Write latch / debouncer │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod debounce;
pub mod error;
pub mod event;
pub mod geometry;
pub mod latch;
pub mod layer;
pub mod scene;
pub mod shape;
pub mod store;

pub use debounce::{ActivityDebouncer, DebounceConfig};
pub use error::{CanvasError, CanvasResult};
pub use event::{MutationEvent, MutationKind, Origin};
pub use geometry::{fit_centered, Rect};
pub use latch::{WriteLatch, WriteScope};
pub use layer::{Layer, LayerDirection, LayerId, LayerIndex, LayerRegistry};
pub use scene::Scene;
pub use shape::{GeoKind, Shape, ShapeId, ShapeKind, ShapeMeta, Transform};
pub use store::CanvasStore;

/// Codraw core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
