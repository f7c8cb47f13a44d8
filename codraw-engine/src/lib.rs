//! # Codraw Engine
//!
//! AI co-drawing on a layered canvas.
//!
//! ## Components
//!
//! - [`Solver`] - snapshot, remote classify/generate, staged accept/reject
//! - [`VoiceSession`] - realtime voice with `analyze_workspace` and
//!   `draw_on_canvas` tools
//! - [`PersistenceSync`] - debounced save of the canvas and a preview
//! - [`Engine`] - wires the above to a [`codraw_core::CanvasStore`]
//!
//! ## Configuration
//!
//! [`EngineConfig::from_env`] reads `CODRAW_*` variables, for example
//! `CODRAW_PROVIDER_URL`, `CODRAW_AUTO_MODE` and `CODRAW_STORE_URL`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod provider;
pub mod solver;
pub mod voice;

pub use config::{EngineConfig, PersistConfig, ProviderConfig, SolverConfig, VoiceConfig};
pub use engine::Engine;
pub use error::{
    ConfigError, EngineError, PersistError, ProviderError, Refusal, SolverError, ToolError,
    VoiceError,
};
pub use persist::{BoardDocument, Connectivity, DocumentStore, HttpDocumentStore, PersistenceSync};
pub use provider::{
    CoDrawProvider, CoDrawRequest, CoDrawResponse, HttpProvider, RequestSource,
    WorkspaceAnalysisRequest,
};
pub use solver::{
    GenerationOutcome, GenerationRequest, PendingGeneration, Solver, SolverPhase, SolverStatus,
};
pub use voice::{VoicePhase, VoiceSession, VoiceStatus};
