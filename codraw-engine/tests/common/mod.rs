//! Shared fakes for engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use codraw_core::{CanvasStore, GeoKind, Scene, Shape, ShapeId, ShapeKind, Transform, WriteLatch};
use codraw_engine::voice::protocol::{ClientEvent, ServerEvent};
use codraw_engine::voice::{AudioInput, AudioOutput, MicrophoneTrack, RealtimeChannel, RealtimeConnector};
use codraw_engine::{
    BoardDocument, CoDrawProvider, CoDrawRequest, CoDrawResponse, DocumentStore, PersistError,
    ProviderError, Solver, SolverConfig, VoiceConfig, VoiceError, WorkspaceAnalysisRequest,
};
use codraw_renderer::{encode_png, to_data_uri, DecodedImage, ImageFormat, SvgRasterizer};

// ============================================================================
// Images and shapes
// ============================================================================

/// PNG data URI: white background with a red square in the middle.
pub fn red_square_png(width: u32, height: u32) -> String {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let inside = x >= width / 4 && x < width * 3 / 4 && y >= height / 4 && y < height * 3 / 4;
            if inside {
                data.extend_from_slice(&[220, 30, 30, 255]);
            } else {
                data.extend_from_slice(&[255, 255, 255, 255]);
            }
        }
    }
    let image = DecodedImage {
        width,
        height,
        data,
        format: ImageFormat::Png,
    };
    to_data_uri("image/png", &encode_png(&image).expect("encode png"))
}

/// A drawing answer carrying `image`.
pub fn draw_with_image(image: String, target_layer: Option<&str>) -> CoDrawResponse {
    CoDrawResponse::Draw {
        message: Some("Here you go".to_string()),
        target_layer: target_layer.map(str::to_string),
        image: Some(image),
        image_text: None,
    }
}

/// A user-drawn rectangle.
pub fn user_rect(x: f32) -> Shape {
    Shape::new(ShapeKind::Geo {
        geo: GeoKind::Rectangle,
        color: "#1e90ff".to_string(),
    })
    .with_transform(Transform {
        x,
        y: 40.0,
        width: 120.0,
        height: 80.0,
        rotation: 0.0,
    })
}

/// Store with an immediate latch release.
pub fn test_store() -> CanvasStore {
    CanvasStore::with_scene(Scene::new(800.0, 600.0), WriteLatch::new(Duration::ZERO))
}

/// Solver over a fresh store with default settings.
pub fn test_solver(provider: Arc<FakeProvider>) -> Solver {
    test_solver_with(provider, SolverConfig::default())
}

/// Solver over a fresh store.
pub fn test_solver_with(provider: Arc<FakeProvider>, config: SolverConfig) -> Solver {
    Solver::new(test_store(), provider, Arc::new(SvgRasterizer::new()), config)
}

/// Yield until `condition` holds or a second of (possibly paused) time passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Provider
// ============================================================================

/// One scripted provider answer.
pub struct Scripted {
    /// Held until notified, if set.
    pub gate: Option<Arc<Notify>>,
    /// Never answers.
    pub hang: bool,
    /// The answer.
    pub result: Result<CoDrawResponse, ProviderError>,
}

impl Scripted {
    pub fn reply(response: CoDrawResponse) -> Self {
        Self {
            gate: None,
            hang: false,
            result: Ok(response),
        }
    }

    pub fn gated(gate: Arc<Notify>, response: CoDrawResponse) -> Self {
        Self {
            gate: Some(gate),
            hang: false,
            result: Ok(response),
        }
    }

    pub fn hang() -> Self {
        Self {
            gate: None,
            hang: true,
            result: Ok(CoDrawResponse::Respond {
                message: String::new(),
            }),
        }
    }

    pub fn fail(error: ProviderError) -> Self {
        Self {
            gate: None,
            hang: false,
            result: Err(error),
        }
    }
}

/// Provider that plays back scripted answers in order.
#[derive(Default)]
pub struct FakeProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CoDrawRequest>>,
    analyses: Mutex<Vec<WorkspaceAnalysisRequest>>,
    /// Notified each time a co-draw call starts.
    pub started: Notify,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, scripted: Scripted) {
        self.script.lock().expect("script").push_back(scripted);
    }

    pub fn requests(&self) -> Vec<CoDrawRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub fn analyses(&self) -> Vec<WorkspaceAnalysisRequest> {
        self.analyses.lock().expect("analyses").clone()
    }
}

#[async_trait]
impl CoDrawProvider for FakeProvider {
    async fn co_draw(&self, request: CoDrawRequest) -> Result<CoDrawResponse, ProviderError> {
        self.requests.lock().expect("requests").push(request);
        let scripted = self
            .script
            .lock()
            .expect("script")
            .pop_front()
            .unwrap_or_else(|| {
                Scripted::reply(CoDrawResponse::Respond {
                    message: "Nice drawing".to_string(),
                })
            });
        self.started.notify_one();
        if scripted.hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = scripted.gate {
            gate.notified().await;
        }
        scripted.result
    }

    async fn analyze_workspace(
        &self,
        request: WorkspaceAnalysisRequest,
    ) -> Result<String, ProviderError> {
        self.analyses.lock().expect("analyses").push(request);
        Ok("A blue rectangle near the top".to_string())
    }
}

// ============================================================================
// Document store
// ============================================================================

/// Store that records saves and can be told to fail.
#[derive(Default)]
pub struct FakeDocumentStore {
    saves: Mutex<Vec<(String, BoardDocument)>>,
    failures: Mutex<VecDeque<PersistError>>,
}

impl FakeDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, error: PersistError) {
        self.failures.lock().expect("failures").push_back(error);
    }

    pub fn saves(&self) -> Vec<(String, BoardDocument)> {
        self.saves.lock().expect("saves").clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().expect("saves").len()
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn save(&self, board_id: &str, document: &BoardDocument) -> Result<(), PersistError> {
        if let Some(error) = self.failures.lock().expect("failures").pop_front() {
            return Err(error);
        }
        self.saves
            .lock()
            .expect("saves")
            .push((board_id.to_string(), document.clone()));
        Ok(())
    }
}

// ============================================================================
// Voice media and transport
// ============================================================================

/// Observable microphone state.
#[derive(Default)]
pub struct MicState {
    pub enabled: AtomicBool,
    pub stopped: AtomicBool,
}

struct FakeTrack(Arc<MicState>);

impl MicrophoneTrack for FakeTrack {
    fn set_enabled(&mut self, enabled: bool) {
        self.0.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.0.enabled.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

/// Microphone that yields frames pushed through `frames`.
#[derive(Default)]
pub struct FakeMicrophone {
    pub state: Arc<MicState>,
    pub unavailable: AtomicBool,
    frames: Mutex<Option<mpsc::Sender<Vec<i16>>>>,
}

impl FakeMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frame_sender(&self) -> Option<mpsc::Sender<Vec<i16>>> {
        self.frames.lock().expect("frames").clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }
}

impl AudioInput for FakeMicrophone {
    fn open(&self) -> Result<(Box<dyn MicrophoneTrack>, mpsc::Receiver<Vec<i16>>), VoiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VoiceError::Microphone("permission denied".into()));
        }
        self.state.enabled.store(true, Ordering::SeqCst);
        self.state.stopped.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.frames.lock().expect("frames") = Some(tx);
        Ok((Box::new(FakeTrack(Arc::clone(&self.state))), rx))
    }
}

/// Speaker that counts what it was asked to do.
#[derive(Default)]
pub struct FakeSpeaker {
    pub samples_played: AtomicUsize,
    pub stops: AtomicUsize,
}

impl AudioOutput for FakeSpeaker {
    fn play(&self, samples: &[i16]) {
        self.samples_played.fetch_add(samples.len(), Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// The endpoint side of a fake realtime channel.
pub struct ServerSide {
    /// Events the session sent.
    pub from_client: mpsc::Receiver<ClientEvent>,
    /// Feed events to the session.
    pub to_client: mpsc::Sender<Result<ServerEvent, VoiceError>>,
    /// Cancelled when the session closes the channel.
    pub shutdown: CancellationToken,
}

impl ServerSide {
    pub async fn send(&self, event: ServerEvent) {
        self.to_client.send(Ok(event)).await.expect("session listening");
    }

    /// Next client event, skipping microphone audio.
    pub async fn next_control_event(&mut self) -> ClientEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
                .await
                .expect("client event in time")
                .expect("channel open");
            if !matches!(event, ClientEvent::InputAudioAppend { .. }) {
                return event;
            }
        }
    }
}

/// Connector handing the endpoint side to the test.
#[derive(Default)]
pub struct FakeConnector {
    pub refuse: AtomicBool,
    server: Mutex<Option<ServerSide>>,
    gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled when a gated connect is waiting.
    pub held: Notify,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_server(&self) -> ServerSide {
        self.server.lock().expect("server").take().expect("connected")
    }

    /// Hold the next connect until `gate` is notified.
    pub fn hold_next(&self, gate: Arc<Notify>) {
        *self.gate.lock().expect("gate") = Some(gate);
    }
}

#[async_trait]
impl RealtimeConnector for FakeConnector {
    async fn connect(&self, _config: &VoiceConfig) -> Result<RealtimeChannel, VoiceError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(VoiceError::Transport("connection refused".into()));
        }
        let gate = self.gate.lock().expect("gate").take();
        if let Some(gate) = gate {
            self.held.notify_one();
            gate.notified().await;
        }
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        *self.server.lock().expect("server") = Some(ServerSide {
            from_client: out_rx,
            to_client: in_tx,
            shutdown: shutdown.clone(),
        });
        Ok(RealtimeChannel {
            outgoing: out_tx,
            incoming: in_rx,
            shutdown,
        })
    }
}

/// Ids of pending shapes that still exist in the store.
pub fn existing_pending(solver: &Solver) -> Vec<ShapeId> {
    solver
        .pending_image_ids()
        .into_iter()
        .filter(|id| solver.store().get_shape(*id).is_some())
        .collect()
}
