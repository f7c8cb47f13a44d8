//! Media and realtime transport seams.
//!
//! The session only talks to these traits; hosts plug in their microphone,
//! speaker and network. [`WebSocketConnector`] is the stock network side.

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::protocol::{ClientEvent, ServerEvent};
use crate::config::VoiceConfig;
use crate::error::VoiceError;

/// Capacity of the control channels in each direction.
const CHANNEL_CAPACITY: usize = 64;

/// A live microphone capture.
pub trait MicrophoneTrack: Send {
    /// Enable or mute capture without releasing the device.
    fn set_enabled(&mut self, enabled: bool);

    /// Whether capture is enabled.
    fn is_enabled(&self) -> bool;

    /// Release the device. Must be safe to call more than once.
    fn stop(&mut self);
}

/// Source of microphone audio.
pub trait AudioInput: Send + Sync {
    /// Acquire the microphone. Frames are mono PCM16 at the endpoint's rate.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Microphone`] if the device cannot be opened.
    fn open(&self) -> Result<(Box<dyn MicrophoneTrack>, mpsc::Receiver<Vec<i16>>), VoiceError>;
}

/// Sink for model audio.
pub trait AudioOutput: Send + Sync {
    /// Queue samples for playback.
    fn play(&self, samples: &[i16]);

    /// Drop queued audio and stop playback.
    fn stop(&self);
}

/// An open control channel.
#[derive(Debug)]
pub struct RealtimeChannel {
    /// Events to the endpoint.
    pub outgoing: mpsc::Sender<ClientEvent>,
    /// Events from the endpoint. An `Err` is terminal.
    pub incoming: mpsc::Receiver<Result<ServerEvent, VoiceError>>,
    /// Cancelling closes the underlying connection.
    pub shutdown: CancellationToken,
}

/// Opens realtime control channels.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Connect and return the open channel.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Transport`] if the connection cannot be made.
    async fn connect(&self, config: &VoiceConfig) -> Result<RealtimeChannel, VoiceError>;
}

/// Encode PCM16 samples as base64 little-endian bytes.
#[must_use]
pub fn encode_pcm16(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 little-endian bytes into PCM16 samples. A trailing odd byte
/// is dropped.
///
/// # Errors
///
/// Returns [`VoiceError::Remote`] if the payload is not valid base64.
pub fn decode_pcm16(payload: &str) -> Result<Vec<i16>, VoiceError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| VoiceError::Remote(format!("invalid audio payload: {e}")))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// [`RealtimeConnector`] over a WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn endpoint(config: &VoiceConfig) -> Result<Url, VoiceError> {
        let mut url = Url::parse(&config.realtime_url)
            .map_err(|e| VoiceError::Transport(format!("invalid realtime URL: {e}")))?;
        url.query_pairs_mut().append_pair("model", &config.model);
        Ok(url)
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    async fn connect(&self, config: &VoiceConfig) -> Result<RealtimeChannel, VoiceError> {
        let url = Self::endpoint(config)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| VoiceError::Transport(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::Transport(format!("connect: {e}")))?;
        tracing::info!(host = url.host_str().unwrap_or_default(), "Realtime channel open");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    outbound = out_rx.recv() => {
                        let Some(event) = outbound else {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping unencodable realtime event");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text)).await {
                            let _ = in_tx.send(Err(VoiceError::Transport(format!("send: {e}")))).await;
                            break;
                        }
                    }
                    inbound = read.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if in_tx.send(Ok(event)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => tracing::debug!(error = %e, "Ignoring unparseable realtime event"),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = in_tx
                                    .send(Err(VoiceError::Transport("connection closed by server".into())))
                                    .await;
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = in_tx.send(Err(VoiceError::Transport(format!("read: {e}")))).await;
                                break;
                            }
                            // Binary, Ping/Pong frames handled by tungstenite.
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
            tracing::debug!("Realtime channel closed");
        });

        Ok(RealtimeChannel {
            outgoing: out_tx,
            incoming: in_rx,
            shutdown,
        })
    }
}
