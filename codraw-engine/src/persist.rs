//! Best-effort persistence of the canvas.
//!
//! Every change restarts a quiet-period timer; when it expires the sync waits
//! for the engine write latch to clear, then sends the canvas JSON and a PNG
//! preview to the document store in one PATCH. Failures are logged and never
//! block later saves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use codraw_core::{ActivityDebouncer, CanvasStore, DebounceConfig};
use codraw_renderer::{Rasterizer, SnapshotRequest};

use crate::config::PersistConfig;
use crate::error::PersistError;

/// Postgres error code for a cancelled long-running statement.
const STATEMENT_TIMEOUT_CODE: &str = "57014";

/// What one save writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardDocument {
    /// Full canvas document.
    pub canvas_data: serde_json::Value,
    /// PNG preview data URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Remote store for whiteboard rows.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Overwrite the stored document of `board_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::StatementTimeout`] when the store cancels the
    /// write for running too long, and another [`PersistError`] otherwise.
    async fn save(&self, board_id: &str, document: &BoardDocument) -> Result<(), PersistError>;
}

/// [`DocumentStore`] over a REST endpoint.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    http: Client,
    base: Url,
    api_key: Option<String>,
}

impl HttpDocumentStore {
    /// Create a store client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::InvalidUrl`] if the URL is malformed.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, PersistError> {
        let mut base = Url::parse(base_url).map_err(|e| PersistError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(PersistError::InvalidUrl(base_url.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(concat!("codraw/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base,
            api_key,
        })
    }

    fn board_url(&self, board_id: &str) -> Result<Url, PersistError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| PersistError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["whiteboards", board_id]);
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn save(&self, board_id: &str, document: &BoardDocument) -> Result<(), PersistError> {
        let mut request = self.http.patch(self.board_url(board_id)?).json(document);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if is_statement_timeout(&body) {
            return Err(PersistError::StatementTimeout);
        }
        Err(PersistError::Status {
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        })
    }
}

fn is_statement_timeout(body: &str) -> bool {
    body.contains(STATEMENT_TIMEOUT_CODE) || body.to_lowercase().contains("statement timeout")
}

/// Shared online/offline flag. Clones share state.
#[derive(Debug, Clone)]
pub struct Connectivity(Arc<AtomicBool>);

impl Connectivity {
    /// Create a flag in the given state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    /// Record a connectivity change.
    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }

    /// Whether saves may be attempted.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

struct SyncInner {
    store: CanvasStore,
    documents: Arc<dyn DocumentStore>,
    rasterizer: Arc<dyn Rasterizer>,
    board_id: String,
    config: PersistConfig,
    connectivity: Connectivity,
    saving: tokio::sync::Mutex<()>,
}

impl SyncInner {
    async fn save_when_settled(&self) {
        self.store.latch().wait_released().await;
        if !self.connectivity.is_online() {
            tracing::debug!(board = %self.board_id, "Offline; skipping save");
            return;
        }
        match self.save_now().await {
            Ok(()) => {}
            Err(PersistError::StatementTimeout) => {
                tracing::debug!(board = %self.board_id, "Save hit statement timeout; will retry on next change");
            }
            Err(e) => tracing::warn!(board = %self.board_id, error = %e, "Save failed"),
        }
    }

    async fn save_now(&self) -> Result<(), PersistError> {
        let _saving = self.saving.lock().await;
        let scene = self.store.scene();
        let canvas_data = scene.to_value()?;

        let rasterizer = Arc::clone(&self.rasterizer);
        let thumbnail_scene = scene.clone();
        let capture = SnapshotRequest::thumbnail(self.config.thumbnail_max_dimension);
        let rendered =
            tokio::task::spawn_blocking(move || rasterizer.rasterize(&thumbnail_scene, &capture))
                .await;
        let preview = match rendered {
            Ok(Ok(Some(raster))) => Some(raster.to_data_uri()),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Preview render failed");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Preview task failed");
                None
            }
        };
        let preview = preview.filter(|uri| {
            let fits = uri.len() <= self.config.preview_cap_bytes;
            if !fits {
                tracing::debug!(bytes = uri.len(), cap = self.config.preview_cap_bytes, "Preview too large; omitted");
            }
            fits
        });

        let document = BoardDocument {
            canvas_data,
            preview,
        };
        self.documents.save(&self.board_id, &document).await?;
        tracing::info!(
            board = %self.board_id,
            revision = scene.revision(),
            shapes = scene.shape_count(),
            "Canvas saved"
        );
        Ok(())
    }
}

/// Debounced save loop. Stops when dropped.
pub struct PersistenceSync {
    inner: Arc<SyncInner>,
    _debouncer: ActivityDebouncer,
}

impl std::fmt::Debug for PersistenceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSync")
            .field("board_id", &self.inner.board_id)
            .finish_non_exhaustive()
    }
}

impl PersistenceSync {
    /// Start syncing `store` to `board_id`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        store: CanvasStore,
        documents: Arc<dyn DocumentStore>,
        rasterizer: Arc<dyn Rasterizer>,
        board_id: impl Into<String>,
        config: PersistConfig,
        connectivity: Connectivity,
    ) -> Self {
        let events = store.subscribe();
        let quiet_period = config.quiet_period();
        let inner = Arc::new(SyncInner {
            store,
            documents,
            rasterizer,
            board_id: board_id.into(),
            config,
            connectivity,
            saving: tokio::sync::Mutex::new(()),
        });

        let weak = Arc::downgrade(&inner);
        let debouncer = ActivityDebouncer::spawn(
            events,
            DebounceConfig::all_changes(quiet_period),
            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                tokio::spawn(async move { inner.save_when_settled().await });
            },
        );

        Self {
            inner,
            _debouncer: debouncer,
        }
    }

    /// Save immediately, ignoring the debounce timer and the write latch.
    ///
    /// # Errors
    ///
    /// Returns the store error, including [`PersistError::StatementTimeout`].
    pub async fn flush(&self) -> Result<(), PersistError> {
        self.inner.save_now().await
    }

    /// Shared connectivity flag.
    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }
}
