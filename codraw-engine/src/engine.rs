//! Engine wiring.
//!
//! ```text
//!   CanvasStore ──events──> auto debouncer ──settled──> Solver::trigger_auto
//!        │      ──events──> Solver edit watch (cancel / prune pending)
//!        │      ──events──> PersistenceSync ──> DocumentStore
//!        └─────────────────> VoiceSession tools ──> Solver (voice)
//! ```

use std::sync::Arc;

use codraw_core::{ActivityDebouncer, CanvasStore, DebounceConfig, Scene, WriteLatch};
use codraw_renderer::{Rasterizer, SvgRasterizer};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::persist::{Connectivity, DocumentStore, HttpDocumentStore, PersistenceSync};
use crate::provider::{CoDrawProvider, HttpProvider};
use crate::solver::Solver;
use crate::voice::{AudioInput, AudioOutput, RealtimeConnector, VoiceSession};

/// A running co-drawing engine. Background tasks stop when it is dropped.
pub struct Engine {
    config: EngineConfig,
    store: CanvasStore,
    solver: Solver,
    edit_watch: JoinHandle<()>,
    _auto: ActivityDebouncer,
    persistence: Option<PersistenceSync>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("solver", &self.solver)
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

/// Create an empty store whose latch uses the configured settle delay.
#[must_use]
pub fn new_store(config: &EngineConfig) -> CanvasStore {
    CanvasStore::with_scene(
        Scene::new(800.0, 600.0),
        WriteLatch::new(config.settle_delay()),
    )
}

impl Engine {
    /// Start the engine over `store`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        store: CanvasStore,
        provider: Arc<dyn CoDrawProvider>,
        rasterizer: Arc<dyn Rasterizer>,
        config: EngineConfig,
    ) -> Self {
        let solver = Solver::new(store.clone(), provider, rasterizer, config.solver.clone());
        let edit_watch = solver.watch_user_edits();

        let auto_solver = solver.clone();
        let auto = ActivityDebouncer::spawn(
            store.subscribe(),
            DebounceConfig::user_activity(config.auto_quiet_period()),
            move || {
                if auto_solver.is_auto_enabled() {
                    auto_solver.trigger_auto();
                }
            },
        );

        tracing::info!(
            auto = config.solver.auto_enabled,
            quiet_ms = config.auto_quiet_period_ms,
            "Engine started"
        );
        Self {
            config,
            store,
            solver,
            edit_watch,
            _auto: auto,
            persistence: None,
        }
    }

    /// Start the engine with the HTTP provider, the SVG rasterizer and, when
    /// a store URL and board id are configured, HTTP persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if a client cannot be built from the configured URLs.
    pub fn from_config(store: CanvasStore, config: EngineConfig) -> Result<Self, EngineError> {
        let provider: Arc<dyn CoDrawProvider> = Arc::new(HttpProvider::new(&config.provider)?);
        let rasterizer: Arc<dyn Rasterizer> = Arc::new(SvgRasterizer::new());

        let documents = match (&config.persist.base_url, &config.persist.board_id) {
            (Some(url), Some(board)) => {
                let documents: Arc<dyn DocumentStore> = Arc::new(HttpDocumentStore::new(
                    url,
                    config.persist.api_key.clone(),
                )?);
                Some((documents, board.clone()))
            }
            _ => None,
        };

        let engine = Self::start(store, provider, Arc::clone(&rasterizer), config);
        Ok(match documents {
            Some((documents, board)) => {
                engine.with_persistence(documents, rasterizer, board, Connectivity::default())
            }
            None => engine,
        })
    }

    /// Attach debounced persistence to `board_id`.
    #[must_use]
    pub fn with_persistence(
        mut self,
        documents: Arc<dyn DocumentStore>,
        rasterizer: Arc<dyn Rasterizer>,
        board_id: impl Into<String>,
        connectivity: Connectivity,
    ) -> Self {
        self.persistence = Some(PersistenceSync::start(
            self.store.clone(),
            documents,
            rasterizer,
            board_id,
            self.config.persist.clone(),
            connectivity,
        ));
        self
    }

    /// Create a voice session bound to this engine's solver.
    #[must_use]
    pub fn voice_session(
        &self,
        audio_input: Arc<dyn AudioInput>,
        audio_output: Arc<dyn AudioOutput>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> VoiceSession {
        VoiceSession::new(
            self.solver.clone(),
            self.config.voice.clone(),
            audio_input,
            audio_output,
            connector,
        )
    }

    /// The canvas.
    #[must_use]
    pub fn store(&self) -> &CanvasStore {
        &self.store
    }

    /// The generation pipeline.
    #[must_use]
    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    /// The persistence sync, if attached.
    #[must_use]
    pub fn persistence(&self) -> Option<&PersistenceSync> {
        self.persistence.as_ref()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.edit_watch.abort();
        self.solver.cancel_in_flight();
    }
}
