//! Voice session lifecycle.
//!
//! ```text
//! idle ──start──> connecting ──> listening <──> thinking <──> calling_tool
//!   ^                                 │
//!   └────────────stop / failure───────┴──> error
//! ```
//!
//! A live session owns the microphone track and the realtime channel. Three
//! tasks run for it: the microphone pump, the event loop, and a single tool
//! worker that answers function calls in the order they complete. Every exit
//! path goes through [`VoiceSession::stop_session`] or the failure path, both
//! of which release all media and the solver's voice guard.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::protocol::{ClientEvent, ServerEvent, SessionConfig};
use super::tools::{tool_definitions, ToolResponse, VoiceTools};
use super::transport::{
    decode_pcm16, encode_pcm16, AudioInput, AudioOutput, MicrophoneTrack, RealtimeConnector,
};
use crate::config::VoiceConfig;
use crate::error::VoiceError;
use crate::solver::Solver;

/// Session phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicePhase {
    /// No session.
    #[default]
    Idle,
    /// Acquiring media and connecting.
    Connecting,
    /// Waiting for the user to speak.
    Listening,
    /// The model is working on a reply.
    Thinking,
    /// A tool call is running.
    CallingTool,
    /// Something failed; `detail` says what.
    Error,
}

/// Observable session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoiceStatus {
    /// Current phase.
    pub phase: VoicePhase,
    /// Extra information, mostly for errors.
    pub detail: Option<String>,
    /// Whether the microphone is muted.
    pub is_muted: bool,
}

/// A function call whose arguments are complete.
#[derive(Debug)]
struct CompletedCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// Arguments still streaming in.
#[derive(Debug, Default)]
struct PartialCall {
    name: Option<String>,
    arguments: String,
}

/// How many completed call ids are remembered for duplicate detection.
const RECENT_CALL_LIMIT: usize = 64;

/// Bounded record of call ids that were already dispatched.
#[derive(Debug)]
struct RecentCalls {
    order: VecDeque<String>,
    seen: HashSet<String>,
    limit: usize,
}

impl RecentCalls {
    fn new(limit: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(limit),
            seen: HashSet::with_capacity(limit),
            limit,
        }
    }

    /// Record `call_id`. Returns `false` if it was already recorded.
    fn insert(&mut self, call_id: &str) -> bool {
        if self.seen.contains(call_id) {
            return false;
        }
        if self.order.len() == self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(call_id.to_string());
        self.seen.insert(call_id.to_string());
        true
    }
}

struct LiveSession {
    id: u64,
    microphone: Box<dyn MicrophoneTrack>,
    outgoing: mpsc::Sender<ClientEvent>,
    channel_shutdown: CancellationToken,
    cancel: CancellationToken,
}

impl LiveSession {
    /// Stop this session's own media and tasks. Shared output and the solver
    /// guard are left alone.
    fn shut_down(&mut self) {
        self.cancel.cancel();
        self.microphone.stop();
        self.channel_shutdown.cancel();
    }
}

#[derive(Default)]
enum Slot {
    #[default]
    Idle,
    Starting(u64),
    Live(LiveSession),
}

#[derive(Default)]
struct SlotState {
    slot: Slot,
    next_id: u64,
}

struct SessionInner {
    solver: Solver,
    tools: VoiceTools,
    config: VoiceConfig,
    audio_input: Arc<dyn AudioInput>,
    audio_output: Arc<dyn AudioOutput>,
    connector: Arc<dyn RealtimeConnector>,
    status: watch::Sender<VoiceStatus>,
    state: Mutex<SlotState>,
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: VoicePhase, detail: Option<String>) {
        self.status.send_modify(|status| {
            status.phase = phase;
            status.detail = detail;
        });
    }

    fn phase(&self) -> VoicePhase {
        self.status.borrow().phase
    }

    fn release(&self, mut live: LiveSession) {
        live.shut_down();
        self.audio_output.stop();
        self.solver.set_voice_active(false);
        tracing::info!(session = live.id, "Voice session released");
    }

    /// End session `id` with an error, if it is still the live one.
    fn fail(&self, id: u64, detail: String) {
        let live = {
            let mut state = self.state();
            match std::mem::take(&mut state.slot) {
                Slot::Live(live) if live.id == id => live,
                other => {
                    state.slot = other;
                    return;
                }
            }
        };
        tracing::warn!(session = id, %detail, "Voice session failed");
        self.release(live);
        self.status.send_replace(VoiceStatus {
            phase: VoicePhase::Error,
            detail: Some(detail),
            is_muted: false,
        });
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let slot = std::mem::take(&mut self.state().slot);
        if let Slot::Live(live) = slot {
            self.release(live);
        }
    }
}

/// Duplex voice session driving the canvas through tool calls. Cheap to
/// clone; the session is torn down when the last clone is dropped.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    /// Create an idle session.
    #[must_use]
    pub fn new(
        solver: Solver,
        config: VoiceConfig,
        audio_input: Arc<dyn AudioInput>,
        audio_output: Arc<dyn AudioOutput>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> Self {
        let (status, _) = watch::channel(VoiceStatus::default());
        let tools = VoiceTools::new(solver.clone(), config.analysis_max_dimension);
        Self {
            inner: Arc::new(SessionInner {
                solver,
                tools,
                config,
                audio_input,
                audio_output,
                connector,
                status,
                state: Mutex::new(SlotState::default()),
            }),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> VoiceStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive every status change.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<VoiceStatus> {
        self.inner.status.subscribe()
    }

    /// Whether a session is connecting or live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self.inner.state().slot, Slot::Idle)
    }

    /// Acquire the microphone, connect, and start listening.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::AlreadyActive`] if a session is connecting or
    /// live, or the microphone/transport error that prevented the start. The
    /// status is left in [`VoicePhase::Error`] on failure.
    pub async fn start_session(&self) -> Result<(), VoiceError> {
        let inner = &self.inner;
        let id = {
            let mut state = inner.state();
            if !matches!(state.slot, Slot::Idle) {
                return Err(VoiceError::AlreadyActive);
            }
            state.next_id += 1;
            let id = state.next_id;
            state.slot = Slot::Starting(id);
            id
        };
        inner.status.send_replace(VoiceStatus {
            phase: VoicePhase::Connecting,
            detail: None,
            is_muted: false,
        });
        tracing::info!(session = id, "Starting voice session");

        match self.connect(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut state = inner.state();
                if matches!(state.slot, Slot::Starting(current) if current == id) {
                    state.slot = Slot::Idle;
                    drop(state);
                    inner.set_phase(VoicePhase::Error, Some(e.to_string()));
                }
                tracing::warn!(session = id, error = %e, "Voice session failed to start");
                Err(e)
            }
        }
    }

    async fn connect(&self, id: u64) -> Result<(), VoiceError> {
        let inner = &self.inner;
        let (mut microphone, frames) = inner.audio_input.open()?;

        let channel = match inner.connector.connect(&inner.config).await {
            Ok(channel) => channel,
            Err(e) => {
                microphone.stop();
                return Err(e);
            }
        };

        let handshake = ClientEvent::SessionUpdate {
            session: SessionConfig::new(
                &inner.config.instructions,
                &inner.config.voice,
                tool_definitions(),
            ),
        };
        if channel.outgoing.send(handshake).await.is_err() {
            microphone.stop();
            channel.shutdown.cancel();
            return Err(VoiceError::Transport("channel closed during handshake".into()));
        }

        let cancel = CancellationToken::new();
        let mut live = LiveSession {
            id,
            microphone,
            outgoing: channel.outgoing.clone(),
            channel_shutdown: channel.shutdown.clone(),
            cancel: cancel.clone(),
        };

        {
            let mut state = inner.state();
            if !matches!(state.slot, Slot::Starting(current) if current == id) {
                drop(state);
                // A newer session may already own the speaker and the guard.
                live.shut_down();
                tracing::info!(session = id, "Abandoned connect torn down");
                return Err(VoiceError::Transport("session stopped while connecting".into()));
            }
            state.slot = Slot::Live(live);
        }
        inner.solver.set_voice_active(true);

        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(inner);
        tokio::spawn(pump_microphone(
            weak.clone(),
            id,
            frames,
            channel.outgoing.clone(),
            cancel.clone(),
        ));
        tokio::spawn(run_tool_worker(
            weak.clone(),
            calls_rx,
            channel.outgoing,
            cancel.clone(),
        ));
        tokio::spawn(run_event_loop(weak, id, channel.incoming, calls_tx, cancel));

        inner.set_phase(VoicePhase::Listening, None);
        tracing::info!(session = id, "Voice session live");
        Ok(())
    }

    /// End the session and release every resource. Safe to call at any time.
    pub fn stop_session(&self) {
        let inner = &self.inner;
        let slot = std::mem::take(&mut inner.state().slot);
        match slot {
            Slot::Live(live) => inner.release(live),
            Slot::Starting(id) => tracing::debug!(session = id, "Voice session stopped while connecting"),
            Slot::Idle => {}
        }
        inner.solver.set_voice_active(false);
        inner.status.send_replace(VoiceStatus::default());
    }

    /// Mute or unmute the microphone. Returns the new muted state, or `None`
    /// if no session is live.
    pub fn toggle_mute(&self) -> Option<bool> {
        let muted = {
            let mut state = self.inner.state();
            let Slot::Live(live) = &mut state.slot else {
                return None;
            };
            let enable = !live.microphone.is_enabled();
            live.microphone.set_enabled(enable);
            !enable
        };
        self.inner.status.send_modify(|status| status.is_muted = muted);
        tracing::debug!(muted, "Microphone toggled");
        Some(muted)
    }

    /// Send a client event on the live channel.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Transport`] if no session is live or the channel
    /// is closed.
    pub async fn send(&self, event: ClientEvent) -> Result<(), VoiceError> {
        let outgoing = match &self.inner.state().slot {
            Slot::Live(live) => live.outgoing.clone(),
            _ => return Err(VoiceError::Transport("no live session".into())),
        };
        outgoing
            .send(event)
            .await
            .map_err(|_| VoiceError::Transport("channel closed".into()))
    }
}

async fn pump_microphone(
    session: Weak<SessionInner>,
    id: u64,
    mut frames: mpsc::Receiver<Vec<i16>>,
    outgoing: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    if let Some(inner) = session.upgrade() {
                        inner.fail(id, "microphone stopped".to_string());
                    }
                    break;
                };
                let event = ClientEvent::InputAudioAppend { audio: encode_pcm16(&frame) };
                if outgoing.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_event_loop(
    session: Weak<SessionInner>,
    id: u64,
    mut incoming: mpsc::Receiver<Result<ServerEvent, VoiceError>>,
    calls: mpsc::UnboundedSender<CompletedCall>,
    cancel: CancellationToken,
) {
    let mut partial: HashMap<String, PartialCall> = HashMap::new();
    let mut completed = RecentCalls::new(RECENT_CALL_LIMIT);

    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => break,
            received = incoming.recv() => received,
        };
        let Some(inner) = session.upgrade() else {
            break;
        };
        let event = match received {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                inner.fail(id, e.to_string());
                break;
            }
            None => {
                inner.fail(id, "realtime channel closed".to_string());
                break;
            }
        };

        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                tracing::debug!(session = id, "Realtime session configured");
            }
            ServerEvent::SpeechStarted => {
                inner.audio_output.stop();
                inner.set_phase(VoicePhase::Listening, None);
            }
            ServerEvent::SpeechStopped | ServerEvent::ResponseCreated => {
                if inner.phase() != VoicePhase::CallingTool {
                    inner.set_phase(VoicePhase::Thinking, None);
                }
            }
            ServerEvent::OutputItemAdded { item } => {
                if let (Some(call_id), true) = (item.call_id, item.kind == "function_call") {
                    partial.entry(call_id).or_default().name = item.name;
                }
            }
            ServerEvent::FunctionCallArgumentsDelta { call_id, delta } => {
                partial.entry(call_id).or_default().arguments.push_str(&delta);
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                if !completed.insert(&call_id) {
                    tracing::debug!(%call_id, "Duplicate function call completion ignored");
                    continue;
                }
                let streamed = partial.remove(&call_id).unwrap_or_default();
                let call = CompletedCall {
                    name: name.or(streamed.name).unwrap_or_default(),
                    arguments: arguments.unwrap_or(streamed.arguments),
                    call_id,
                };
                if calls.send(call).is_err() {
                    break;
                }
            }
            ServerEvent::AudioDelta { delta } => match decode_pcm16(&delta) {
                Ok(samples) => inner.audio_output.play(&samples),
                Err(e) => tracing::debug!(error = %e, "Skipping undecodable audio"),
            },
            ServerEvent::ResponseDone => {
                if inner.phase() == VoicePhase::Thinking {
                    inner.set_phase(VoicePhase::Listening, None);
                }
            }
            ServerEvent::Error { error } => {
                tracing::warn!(session = id, code = ?error.code, message = %error.message, "Realtime error");
                inner.set_phase(VoicePhase::Error, Some(error.message));
            }
            ServerEvent::Unknown => {}
        }
    }
}

async fn run_tool_worker(
    session: Weak<SessionInner>,
    mut calls: mpsc::UnboundedReceiver<CompletedCall>,
    outgoing: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    loop {
        let call = tokio::select! {
            () = cancel.cancelled() => break,
            call = calls.recv() => call,
        };
        let Some(call) = call else {
            break;
        };
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.set_phase(VoicePhase::CallingTool, Some(call.name.clone()));
        let tools = inner.tools.clone();
        // The dispatch may run for a long time; don't keep the session alive.
        drop(inner);

        let result = tokio::select! {
            () = cancel.cancelled() => break,
            result = tools.dispatch(&call.name, &call.arguments) => result,
        };
        let Some(inner) = session.upgrade() else {
            break;
        };
        let response = match result {
            Ok(response) => {
                inner.set_phase(VoicePhase::Thinking, None);
                response
            }
            Err(e) => {
                tracing::warn!(call_id = %call.call_id, tool = %call.name, error = %e, "Voice tool failed");
                inner.set_phase(VoicePhase::Error, Some(e.to_string()));
                ToolResponse::error(e.to_string())
            }
        };

        let output = ClientEvent::function_output(call.call_id, &response.to_value());
        if outgoing.send(output).await.is_err() || outgoing.send(ClientEvent::ResponseCreate).await.is_err() {
            break;
        }
    }
}
