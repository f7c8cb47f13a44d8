//! Realtime control events.
//!
//! Every frame on the control channel is a JSON object whose `type` field
//! selects the event. Server events this engine does not act on decode to
//! [`ServerEvent::Unknown`].

use serde::{Deserialize, Serialize};

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Function name.
    pub name: String,
    /// What the function does, for the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// A function tool.
    #[must_use]
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Session parameters sent in the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Output modalities.
    pub modalities: Vec<String>,
    /// System instructions.
    pub instructions: String,
    /// Output voice.
    pub voice: String,
    /// Encoding of microphone audio.
    pub input_audio_format: String,
    /// Encoding of model audio.
    pub output_audio_format: String,
    /// Server-side voice activity detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<serde_json::Value>,
    /// Callable functions.
    pub tools: Vec<ToolDefinition>,
    /// Tool selection policy.
    pub tool_choice: String,
}

impl SessionConfig {
    /// Audio-and-text session with server VAD and the given tools.
    #[must_use]
    pub fn new(instructions: &str, voice: &str, tools: Vec<ToolDefinition>) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: instructions.to_string(),
            voice: voice.to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: Some(serde_json::json!({ "type": "server_vad" })),
            tools,
            tool_choice: "auto".to_string(),
        }
    }
}

/// Item added to the conversation by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// Result of a function call.
    FunctionCallOutput {
        /// Call being answered.
        call_id: String,
        /// JSON-encoded result.
        output: String,
    },
}

/// Events sent to the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure the session.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// New session parameters.
        session: SessionConfig,
    },
    /// Append microphone audio.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend {
        /// Base64 PCM16 little-endian samples.
        audio: String,
    },
    /// Add an item to the conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The item.
        item: ConversationItem,
    },
    /// Ask the model for its next turn.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Answer a function call.
    #[must_use]
    pub fn function_output(call_id: impl Into<String>, output: &serde_json::Value) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.to_string(),
            },
        }
    }
}

/// An item the model started producing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputItem {
    /// Item type, e.g. `"message"` or `"function_call"`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Function call id for function-call items.
    #[serde(default)]
    pub call_id: Option<String>,
    /// Function name for function-call items.
    #[serde(default)]
    pub name: Option<String>,
}

/// Error payload sent by the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
    /// Machine-readable code.
    #[serde(default)]
    pub code: Option<String>,
}

/// Events received from the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session is open.
    #[serde(rename = "session.created")]
    SessionCreated,
    /// Session parameters were applied.
    #[serde(rename = "session.updated")]
    SessionUpdated,
    /// The user started speaking.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    /// The user stopped speaking.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    /// The model started a response.
    #[serde(rename = "response.created")]
    ResponseCreated,
    /// The model started an output item.
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// The item.
        #[serde(default)]
        item: OutputItem,
    },
    /// A chunk of function-call arguments.
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Call the chunk belongs to.
        call_id: String,
        /// Argument text fragment.
        delta: String,
    },
    /// Function-call arguments are complete.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Completed call.
        call_id: String,
        /// Function name, when the endpoint repeats it.
        #[serde(default)]
        name: Option<String>,
        /// Full arguments, when the endpoint repeats them.
        #[serde(default)]
        arguments: Option<String>,
    },
    /// A chunk of model audio.
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64 PCM16 little-endian samples.
        delta: String,
    },
    /// The model finished its turn.
    #[serde(rename = "response.done")]
    ResponseDone,
    /// The endpoint reported a failure.
    #[serde(rename = "error")]
    Error {
        /// Failure details.
        #[serde(default)]
        error: RemoteError,
    },
    /// Anything else.
    #[serde(other)]
    Unknown,
}
