//! Voice-driven drawing.
//!
//! A realtime duplex session streams microphone audio to a speech model and
//! plays its replies. The model reaches the canvas through two function
//! tools, so voice requests go through the same pipeline as chat.

pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;

pub use protocol::{ClientEvent, ServerEvent, SessionConfig, ToolDefinition};
pub use session::{VoicePhase, VoiceSession, VoiceStatus};
pub use tools::{tool_definitions, ToolResponse, VoiceTools, ANALYZE_WORKSPACE, DRAW_ON_CANVAS};
pub use transport::{
    AudioInput, AudioOutput, MicrophoneTrack, RealtimeChannel, RealtimeConnector,
    WebSocketConnector,
};
