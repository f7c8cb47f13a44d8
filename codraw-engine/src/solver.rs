//! Generation pipeline.
//!
//! ```text
//! idle ──generate──> generating ──┬──> success ──(delay)──> idle
//!                         │       └──> error   ──(delay)──> idle
//!                         └──cancel──────────────────────────> idle
//! ```
//!
//! At most one request is in flight. Each request gets a generation number and
//! a [`CancellationToken`]; every step after an `.await` re-checks both before
//! touching the canvas, so a cancelled or superseded request never leaves a
//! shape or a status behind.
//!
//! Successful drawings are staged: the image shape is created locked and
//! flagged pending, and stays that way until [`Solver::handle_accept`] or
//! [`Solver::handle_reject`] resolves it.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use codraw_core::{fit_centered, CanvasStore, LayerId, MutationEvent, MutationKind, Shape, ShapeId, ShapeKind};
use codraw_renderer::{
    decode_image_source, encode_png, strip_background, to_data_uri, Rasterizer, RenderError,
    SnapshotRequest,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SolverConfig;
use crate::error::{ProviderError, Refusal, SolverError};
use crate::provider::{CoDrawProvider, CoDrawRequest, CoDrawResponse, RequestSource};

/// Observable pipeline phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverPhase {
    /// Nothing running.
    #[default]
    Idle,
    /// A request is in flight.
    Generating,
    /// The last request finished.
    Success,
    /// The last request failed.
    Error,
}

/// Snapshot of the pipeline state, published on a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SolverStatus {
    /// Current phase.
    pub phase: SolverPhase,
    /// Progress or result text.
    pub status_message: Option<String>,
    /// Failure text.
    pub error_message: Option<String>,
}

impl SolverStatus {
    fn with_message(phase: SolverPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            status_message: Some(message.into()),
            error_message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: SolverPhase::Error,
            status_message: None,
            error_message: Some(message.into()),
        }
    }
}

/// A staged generation awaiting accept or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGeneration {
    /// The staged image shape.
    pub shape_id: ShapeId,
    /// Layer it was staged on.
    pub layer_id: LayerId,
    /// When it was staged.
    pub created_at: SystemTime,
}

/// Input to [`Solver::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// What the user asked for.
    pub prompt: Option<String>,
    /// Extra images as data URIs.
    pub reference_images: Vec<String>,
    /// Who asked.
    pub source: RequestSource,
    /// Skip the voice-exclusivity guard.
    pub bypass_voice_guard: bool,
}

impl GenerationRequest {
    /// Request triggered by settled canvas activity.
    #[must_use]
    pub fn auto() -> Self {
        Self {
            prompt: None,
            reference_images: Vec::new(),
            source: RequestSource::Auto,
            bypass_voice_guard: false,
        }
    }

    /// Explicit chat prompt.
    #[must_use]
    pub fn chat(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            reference_images: Vec::new(),
            source: RequestSource::Chat,
            bypass_voice_guard: false,
        }
    }

    /// Request from the voice tool. Always passes the voice guard.
    #[must_use]
    pub fn voice(instructions: Option<String>) -> Self {
        Self {
            prompt: instructions.filter(|s| !s.trim().is_empty()),
            reference_images: Vec::new(),
            source: RequestSource::Voice,
            bypass_voice_guard: true,
        }
    }

    /// Attach reference images.
    #[must_use]
    pub fn with_reference_images(mut self, images: Vec<String>) -> Self {
        self.reference_images = images;
        self
    }
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The provider answered with text only.
    Responded {
        /// Reply text.
        message: String,
    },
    /// An image was staged on the canvas.
    Staged {
        /// The pending shape.
        shape_id: ShapeId,
        /// Its layer.
        layer_id: LayerId,
        /// Provider text, if any.
        message: Option<String>,
    },
    /// Cancelled or superseded; nothing was applied.
    Cancelled,
}

impl GenerationOutcome {
    /// Whether the request produced a reply or a drawing.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct SolverState {
    in_flight: Option<InFlight>,
    next_generation: u64,
    pending: Vec<PendingGeneration>,
    auto_enabled: bool,
    voice_active: bool,
    /// Bumped on every status publish; a scheduled reset only applies if the
    /// epoch it captured is still current.
    status_epoch: u64,
}

impl SolverState {
    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation && !f.token.is_cancelled())
    }
}

struct SolverInner {
    store: CanvasStore,
    provider: Arc<dyn CoDrawProvider>,
    rasterizer: Arc<dyn Rasterizer>,
    config: SolverConfig,
    status: watch::Sender<SolverStatus>,
    state: Mutex<SolverState>,
}

/// The generation pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Solver {
    inner: Arc<SolverInner>,
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl Solver {
    /// Create a solver over `store`.
    #[must_use]
    pub fn new(
        store: CanvasStore,
        provider: Arc<dyn CoDrawProvider>,
        rasterizer: Arc<dyn Rasterizer>,
        config: SolverConfig,
    ) -> Self {
        let (status, _) = watch::channel(SolverStatus::default());
        let state = SolverState {
            auto_enabled: config.auto_enabled,
            ..SolverState::default()
        };
        Self {
            inner: Arc::new(SolverInner {
                store,
                provider,
                rasterizer,
                config,
                status,
                state: Mutex::new(state),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SolverState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The canvas this solver writes to.
    #[must_use]
    pub fn store(&self) -> &CanvasStore {
        &self.inner.store
    }

    /// The provider used for generation and workspace analysis.
    #[must_use]
    pub fn provider(&self) -> Arc<dyn CoDrawProvider> {
        Arc::clone(&self.inner.provider)
    }

    /// The rasterizer used for snapshots.
    #[must_use]
    pub fn rasterizer(&self) -> Arc<dyn Rasterizer> {
        Arc::clone(&self.inner.rasterizer)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SolverStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive every status change.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SolverStatus> {
        self.inner.status.subscribe()
    }

    /// Whether a request is in flight.
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.state().in_flight.is_some()
    }

    /// Publish `status`, optionally reverting to idle after `reset_after`.
    fn publish(&self, state: &mut SolverState, status: SolverStatus, reset_after: Option<Duration>) {
        state.status_epoch += 1;
        let epoch = state.status_epoch;
        self.inner.status.send_replace(status);

        let Some(delay) = reset_after else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<SolverInner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let solver = Solver { inner };
            let mut state = solver.state();
            if state.status_epoch == epoch {
                solver.publish(&mut state, SolverStatus::default(), None);
            }
        });
    }

    // -----------------------------------------------------------------------
    // Switches
    // -----------------------------------------------------------------------

    /// Enable or disable auto mode.
    pub fn set_auto_enabled(&self, enabled: bool) {
        self.state().auto_enabled = enabled;
        tracing::info!(enabled, "Auto mode changed");
    }

    /// Whether auto mode is on.
    #[must_use]
    pub fn is_auto_enabled(&self) -> bool {
        self.state().auto_enabled
    }

    /// Mark a voice session as owning the canvas.
    pub fn set_voice_active(&self, active: bool) {
        self.state().voice_active = active;
        tracing::debug!(active, "Voice guard changed");
    }

    /// Whether a voice session owns the canvas.
    #[must_use]
    pub fn is_voice_active(&self) -> bool {
        self.state().voice_active
    }

    /// Cancel the in-flight request, if any, and return to idle silently.
    ///
    /// Returns `true` if a request was cancelled.
    pub fn cancel_in_flight(&self) -> bool {
        let mut state = self.state();
        let Some(flight) = state.in_flight.take() else {
            return false;
        };
        flight.token.cancel();
        tracing::info!(generation = flight.generation, "Generation cancelled");
        self.publish(&mut state, SolverStatus::default(), None);
        true
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Run one generation request to completion.
    ///
    /// A cancelled or superseded request resolves to
    /// [`GenerationOutcome::Cancelled`] rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::Refused`] if the entry guard rejects the request,
    /// and the underlying failure if the remote call, decoding, or staging
    /// fails.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, SolverError> {
        let (generation, token) = match self.begin(&request) {
            Ok(started) => started,
            Err(refusal) => {
                tracing::debug!(source = %request.source, %refusal, "Generation refused");
                self.report_refusal(refusal);
                return Err(refusal.into());
            }
        };

        tracing::info!(generation, source = %request.source, "Generation started");
        let result = self.run(generation, &token, request).await;
        self.finish(generation, result)
    }

    /// Spawn an auto-mode generation. Refusals are logged, not surfaced.
    pub fn trigger_auto(&self) -> JoinHandle<()> {
        let solver = self.clone();
        tokio::spawn(async move {
            match solver.generate(GenerationRequest::auto()).await {
                Ok(outcome) => tracing::debug!(?outcome, "Auto generation finished"),
                Err(SolverError::Refused(refusal)) => {
                    tracing::debug!(%refusal, "Auto generation skipped");
                }
                Err(e) => tracing::debug!(error = %e, "Auto generation failed"),
            }
        })
    }

    fn begin(&self, request: &GenerationRequest) -> Result<(u64, CancellationToken), Refusal> {
        let mut state = self.state();

        if state.voice_active
            && request.source != RequestSource::Voice
            && !request.bypass_voice_guard
        {
            return Err(Refusal::VoiceActive);
        }
        if request.source == RequestSource::Auto && !state.auto_enabled {
            return Err(Refusal::AutoDisabled);
        }
        if state.in_flight.is_some() {
            if request.source != RequestSource::Chat {
                return Err(Refusal::InFlight);
            }
            if let Some(previous) = state.in_flight.take() {
                previous.token.cancel();
                tracing::info!(
                    generation = previous.generation,
                    "Generation superseded by chat request"
                );
            }
        }
        if request.source == RequestSource::Auto
            && self.inner.store.shapes().iter().all(Shape::is_pending)
        {
            return Err(Refusal::EmptyCanvas);
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let token = CancellationToken::new();
        state.in_flight = Some(InFlight {
            generation,
            token: token.clone(),
        });
        let message = match request.source {
            RequestSource::Auto => "Looking at your drawing...",
            RequestSource::Voice | RequestSource::Chat => "Generating...",
        };
        self.publish(
            &mut state,
            SolverStatus::with_message(SolverPhase::Generating, message),
            None,
        );
        Ok((generation, token))
    }

    fn report_refusal(&self, refusal: Refusal) {
        let mut state = self.state();
        let current = self.inner.status.borrow().clone();
        // Publishing supersedes any pending reset, so every settled phase
        // needs a fresh one.
        let reset = match current.phase {
            SolverPhase::Idle | SolverPhase::Success => Some(self.inner.config.success_reset()),
            SolverPhase::Error => Some(self.inner.config.error_reset()),
            SolverPhase::Generating => None,
        };
        let status = SolverStatus {
            status_message: Some(refusal.to_string()),
            ..current
        };
        self.publish(&mut state, status, reset);
    }

    async fn run(
        &self,
        generation: u64,
        token: &CancellationToken,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, SolverError> {
        let store = &self.inner.store;
        let config = &self.inner.config;

        let scene = store.scene();
        let rasterizer = Arc::clone(&self.inner.rasterizer);
        let capture =
            SnapshotRequest::viewport_jpeg(config.snapshot_max_dimension, config.snapshot_quality);
        let snapshot = tokio::task::spawn_blocking(move || rasterizer.rasterize(&scene, &capture))
            .await??
            .map(|raster| raster.to_data_uri());
        if token.is_cancelled() {
            return Ok(GenerationOutcome::Cancelled);
        }

        let body = CoDrawRequest {
            snapshot,
            prompt: request.prompt,
            reference_images: request.reference_images,
            source: request.source,
            layers: store.layers().into_iter().map(|layer| layer.name).collect(),
        };

        let call = self.inner.provider.co_draw(body);
        let response = tokio::select! {
            () = token.cancelled() => return Ok(GenerationOutcome::Cancelled),
            result = bounded(call, config.generation_timeout()) => result?,
        };

        if !self.state().is_current(generation) {
            return Ok(GenerationOutcome::Cancelled);
        }

        let message = response.message().map(str::to_string);
        let (target_layer, image) = match response {
            CoDrawResponse::Respond { .. } => {
                return Ok(GenerationOutcome::Responded {
                    message: message.unwrap_or_default(),
                })
            }
            CoDrawResponse::Draw {
                target_layer,
                image,
                ..
            } => (target_layer, image),
        };
        let Some(image) = image.filter(|s| !s.trim().is_empty()) else {
            return match message {
                Some(message) => Ok(GenerationOutcome::Responded { message }),
                None => Err(SolverError::NoImage),
            };
        };

        let threshold = config.background_threshold;
        let (src, width, height) = tokio::task::spawn_blocking(move || {
            let mut decoded = decode_image_source(&image)?;
            let cleared = strip_background(&mut decoded, threshold);
            tracing::debug!(
                width = decoded.width,
                height = decoded.height,
                cleared,
                "Generated image decoded"
            );
            let src = to_data_uri("image/png", &encode_png(&decoded)?);
            Ok::<_, RenderError>((src, decoded.width, decoded.height))
        })
        .await??;
        if token.is_cancelled() {
            return Ok(GenerationOutcome::Cancelled);
        }

        self.stage(generation, src, width, height, target_layer.as_deref(), message)
    }

    /// Create the pending shape, atomically with the currency check.
    fn stage(
        &self,
        generation: u64,
        src: String,
        pixel_width: u32,
        pixel_height: u32,
        target_layer: Option<&str>,
        message: Option<String>,
    ) -> Result<GenerationOutcome, SolverError> {
        let store = &self.inner.store;
        let mut state = self.state();
        if !state.is_current(generation) {
            return Ok(GenerationOutcome::Cancelled);
        }

        let _scope = store.latch().acquire();
        let layer = target_layer
            .map(|name| store.find_or_create_layer(name))
            .and_then(|id| store.layer(&id))
            .unwrap_or_else(|| store.active_layer());

        #[allow(clippy::cast_precision_loss)]
        let bounds = fit_centered(pixel_width as f32, pixel_height as f32, &store.viewport());
        let mut shape = Shape::new(ShapeKind::Image {
            src,
            pixel_width,
            pixel_height,
        })
        .with_transform(bounds.into())
        .on_layer(layer.id.clone());
        let (opacity, locked) = layer.visual_state(true);
        shape.opacity = opacity;
        shape.is_locked = locked;
        shape.meta.pending = true;

        let shape_id = store.create_shape(shape)?;
        state.pending.push(PendingGeneration {
            shape_id,
            layer_id: layer.id.clone(),
            created_at: SystemTime::now(),
        });
        state.in_flight = None;

        tracing::info!(%shape_id, layer = %layer.name, "Generation staged");
        Ok(GenerationOutcome::Staged {
            shape_id,
            layer_id: layer.id,
            message,
        })
    }

    fn finish(
        &self,
        generation: u64,
        result: Result<GenerationOutcome, SolverError>,
    ) -> Result<GenerationOutcome, SolverError> {
        let mut state = self.state();
        let live = state.is_current(generation);
        if state
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
        {
            state.in_flight = None;
        }
        let config = &self.inner.config;

        match result {
            Ok(GenerationOutcome::Staged {
                shape_id,
                layer_id,
                message,
            }) => {
                let text = message.clone().unwrap_or_else(|| "Drawing added".to_string());
                self.publish(
                    &mut state,
                    SolverStatus::with_message(SolverPhase::Success, text),
                    Some(config.success_reset()),
                );
                Ok(GenerationOutcome::Staged {
                    shape_id,
                    layer_id,
                    message,
                })
            }
            Ok(GenerationOutcome::Responded { message }) if live => {
                self.publish(
                    &mut state,
                    SolverStatus::with_message(SolverPhase::Success, message.clone()),
                    Some(config.success_reset()),
                );
                Ok(GenerationOutcome::Responded { message })
            }
            Err(e) if live => {
                tracing::warn!(generation, error = %e, retryable = e.is_retryable(), "Generation failed");
                self.publish(
                    &mut state,
                    SolverStatus::failed(e.to_string()),
                    Some(config.error_reset()),
                );
                Err(e)
            }
            Ok(_) | Err(_) => {
                tracing::debug!(generation, "Generation result discarded");
                Ok(GenerationOutcome::Cancelled)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Pending generations
    // -----------------------------------------------------------------------

    /// Ids of staged shapes, oldest first.
    #[must_use]
    pub fn pending_image_ids(&self) -> Vec<ShapeId> {
        self.state().pending.iter().map(|p| p.shape_id).collect()
    }

    /// Staged generations, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingGeneration> {
        self.state().pending.clone()
    }

    fn take_pending(&self, shape_id: ShapeId) -> Option<PendingGeneration> {
        let mut state = self.state();
        let index = state.pending.iter().position(|p| p.shape_id == shape_id)?;
        Some(state.pending.remove(index))
    }

    /// Make a staged shape permanent.
    ///
    /// The shape takes its layer's visibility and lock. Returns `false` if the
    /// id is not pending.
    pub fn handle_accept(&self, shape_id: ShapeId) -> bool {
        let Some(entry) = self.take_pending(shape_id) else {
            return false;
        };
        let store = &self.inner.store;
        let _scope = store.latch().acquire();

        let layer = store
            .layer_of(shape_id)
            .and_then(|id| store.layer(&id))
            .or_else(|| store.layer(&entry.layer_id))
            .unwrap_or_else(|| store.active_layer());
        let (opacity, locked) = layer.visual_state(false);
        let result = store.update_shape(shape_id, |shape| {
            shape.meta.pending = false;
            shape.opacity = opacity;
            shape.is_locked = locked;
        });
        if let Err(e) = result {
            tracing::debug!(%shape_id, error = %e, "Accepted shape no longer exists");
        } else {
            tracing::info!(%shape_id, layer = %layer.name, "Generation accepted");
        }
        true
    }

    /// Delete a staged shape. Returns `false` if the id is not pending.
    pub fn handle_reject(&self, shape_id: ShapeId) -> bool {
        if self.take_pending(shape_id).is_none() {
            return false;
        }
        let store = &self.inner.store;
        let _scope = store.latch().acquire();
        match store.delete_shape(shape_id) {
            Ok(_) => tracing::info!(%shape_id, "Generation rejected"),
            Err(e) => tracing::debug!(%shape_id, error = %e, "Rejected shape already gone"),
        }
        true
    }

    /// Accept the most recent staged shape.
    pub fn accept_current(&self) -> Option<ShapeId> {
        let current = self.state().pending.last().map(|p| p.shape_id)?;
        self.handle_accept(current).then_some(current)
    }

    /// Reject the most recent staged shape.
    pub fn reject_current(&self) -> Option<ShapeId> {
        let current = self.state().pending.last().map(|p| p.shape_id)?;
        self.handle_reject(current).then_some(current)
    }

    // -----------------------------------------------------------------------
    // Canvas observation
    // -----------------------------------------------------------------------

    /// Spawn the task that reacts to canvas mutations.
    ///
    /// User shape edits cancel the in-flight request; deleting a staged shape
    /// drops it from the pending list. The task ends when the solver is
    /// dropped or the store closes.
    pub fn watch_user_edits(&self) -> JoinHandle<()> {
        let mut events = self.inner.store.subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let solver = Solver { inner };
                match received {
                    Ok(event) => solver.observe(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Solver lagged on canvas events");
                        solver.prune_pending();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn observe(&self, event: &MutationEvent) {
        if let (MutationKind::Deleted, Some(id)) = (event.kind, event.shape_id) {
            if self.take_pending(id).is_some() {
                tracing::debug!(shape_id = %id, "Staged shape deleted");
            }
        }
        if event.is_user() && event.is_shape_change() && self.cancel_in_flight() {
            tracing::info!("User edit interrupted generation");
        }
    }

    fn prune_pending(&self) {
        let store = &self.inner.store;
        self.state()
            .pending
            .retain(|p| store.get_shape(p.shape_id).is_some());
    }
}

/// Await `call`, failing with [`SolverError::Timeout`] after `limit`.
async fn bounded<F, T>(call: F, limit: Option<Duration>) -> Result<T, SolverError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| SolverError::Timeout(limit))?
            .map_err(SolverError::from),
        None => call.await.map_err(SolverError::from),
    }
}
