//! Shared canvas storage.
//!
//! [`CanvasStore`] pairs the [`Scene`] with its [`LayerRegistry`] behind one
//! lock, runs the layer registration hook on every shape creation, and
//! broadcasts every committed change as a [`MutationEvent`] stamped with the
//! origin read from the [`WriteLatch`].

use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::geometry::Rect;
use crate::layer::{Layer, LayerDirection, LayerId, LayerIndex, LayerRegistry, LAYERS_META_KEY};
use crate::latch::WriteLatch;
use crate::{CanvasResult, MutationEvent, Origin, Scene, Shape, ShapeId};

/// Default viewport width in pixels.
const DEFAULT_WIDTH: f32 = 800.0;

/// Default viewport height in pixels.
const DEFAULT_HEIGHT: f32 = 600.0;

/// Capacity of the mutation broadcast channel.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Inner {
    scene: Scene,
    layers: LayerRegistry,
    index_cache: Option<(u64, LayerIndex)>,
}

impl Inner {
    fn persist_layers(&mut self) {
        self.scene
            .set_page_meta(LAYERS_META_KEY, self.layers.to_page_meta());
    }
}

/// Thread-safe canvas handle shared by the solver, voice tools and sync.
///
/// # Example
///
/// ```
/// use codraw_core::store::CanvasStore;
/// use codraw_core::{Shape, ShapeKind};
///
/// let store = CanvasStore::new();
/// let shape = Shape::new(ShapeKind::Text {
///     content: "Hello".to_string(),
///     font_size: 16.0,
///     color: "#000000".to_string(),
/// });
///
/// let id = store.create_shape(shape).unwrap();
/// assert_eq!(store.layer_of(id), Some(store.active_layer().id));
/// ```
#[derive(Debug, Clone)]
pub struct CanvasStore {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<MutationEvent>,
    latch: WriteLatch,
}

impl Default for CanvasStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasStore {
    /// Create an empty canvas with an 800x600 viewport.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scene(Scene::new(DEFAULT_WIDTH, DEFAULT_HEIGHT), WriteLatch::default())
    }

    /// Wrap an existing scene. Layer metadata is restored and tags reconciled.
    #[must_use]
    pub fn with_scene(scene: Scene, latch: WriteLatch) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            inner: Arc::new(RwLock::new(Inner {
                scene: Scene::default(),
                layers: LayerRegistry::new(),
                index_cache: None,
            })),
            events,
            latch,
        };
        store.replace_scene(scene);
        store
    }

    /// The write latch used to stamp event origins.
    #[must_use]
    pub fn latch(&self) -> &WriteLatch {
        &self.latch
    }

    /// Subscribe to committed mutations.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&inner)
    }

    /// Run `f` under the write lock, then broadcast whatever it changed.
    fn write<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, changes) = {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let result = f(&mut inner);
            (result, inner.scene.take_changes())
        };
        if !changes.is_empty() {
            let origin = if self.latch.is_held() {
                Origin::Engine
            } else {
                Origin::User
            };
            for change in changes {
                // No receivers is fine.
                let _ = self.events.send(change.stamp(origin));
            }
        }
        result
    }

    fn write_layers<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        self.write(|inner| {
            let result = f(inner);
            inner.persist_layers();
            result
        })
    }

    // -----------------------------------------------------------------------
    // Shapes
    // -----------------------------------------------------------------------

    /// Add a shape through the layer registration hook.
    ///
    /// # Errors
    ///
    /// Returns an error if a shape with the same id already exists.
    pub fn create_shape(&self, mut shape: Shape) -> CanvasResult<ShapeId> {
        self.write(|inner| {
            inner.layers.register_shape(&mut shape);
            inner.scene.add_shape(shape)
        })
    }

    /// Mutate a shape in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape does not exist.
    pub fn update_shape<F>(&self, id: ShapeId, f: F) -> CanvasResult<()>
    where
        F: FnOnce(&mut Shape),
    {
        self.write(|inner| inner.scene.update_shape(id, f))
    }

    /// Remove a shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape does not exist.
    pub fn delete_shape(&self, id: ShapeId) -> CanvasResult<Shape> {
        self.write(|inner| inner.scene.remove_shape(&id))
    }

    /// Get a copy of a shape.
    #[must_use]
    pub fn get_shape(&self, id: ShapeId) -> Option<Shape> {
        self.read(|inner| inner.scene.get_shape(id).cloned())
    }

    /// All shapes, back to front.
    #[must_use]
    pub fn shapes(&self) -> Vec<Shape> {
        self.read(|inner| inner.scene.shapes().cloned().collect())
    }

    /// Number of shapes.
    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.read(|inner| inner.scene.shape_count())
    }

    /// Whether the canvas has no shapes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read(|inner| inner.scene.is_empty())
    }

    /// The visible region.
    #[must_use]
    pub fn viewport(&self) -> Rect {
        self.read(|inner| inner.scene.viewport())
    }

    /// Set the visible region. Viewport moves are not mutations.
    pub fn set_viewport(&self, viewport: Rect) {
        self.write(|inner| inner.scene.set_viewport(viewport));
    }

    /// Read a page metadata value.
    #[must_use]
    pub fn page_meta(&self, key: &str) -> Option<serde_json::Value> {
        self.read(|inner| inner.scene.page_meta(key).cloned())
    }

    /// Write a page metadata value.
    pub fn set_page_meta(&self, key: &str, value: serde_json::Value) {
        self.write(|inner| inner.scene.set_page_meta(key, value));
    }

    /// A copy of the whole scene.
    #[must_use]
    pub fn scene(&self) -> Scene {
        self.read(|inner| inner.scene.clone())
    }

    /// Current scene revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.read(|inner| inner.scene.revision())
    }

    // -----------------------------------------------------------------------
    // Layers
    // -----------------------------------------------------------------------

    /// All layers, back to front.
    #[must_use]
    pub fn layers(&self) -> Vec<Layer> {
        self.read(|inner| inner.layers.layers().to_vec())
    }

    /// Look up a layer.
    #[must_use]
    pub fn layer(&self, id: &LayerId) -> Option<Layer> {
        self.read(|inner| inner.layers.layer(id).cloned())
    }

    /// The active layer.
    #[must_use]
    pub fn active_layer(&self) -> Layer {
        self.read(|inner| inner.layers.active_layer().clone())
    }

    /// Append a new auto-named layer and activate it.
    pub fn add_layer(&self) -> LayerId {
        self.write_layers(|inner| inner.layers.add_layer())
    }

    /// Delete a layer and its shapes. No-op for the only layer.
    pub fn delete_layer(&self, id: &LayerId) -> bool {
        self.write_layers(|inner| inner.layers.delete_layer(&mut inner.scene, id))
    }

    /// Flip a layer's visibility. Returns the new state.
    pub fn toggle_visibility(&self, id: &LayerId) -> Option<bool> {
        self.write_layers(|inner| inner.layers.toggle_visibility(&mut inner.scene, id))
    }

    /// Flip a layer's lock. Returns the new state.
    pub fn toggle_lock(&self, id: &LayerId) -> Option<bool> {
        self.write_layers(|inner| inner.layers.toggle_lock(&mut inner.scene, id))
    }

    /// Rename a layer.
    pub fn rename_layer(&self, id: &LayerId, name: &str) -> bool {
        self.write_layers(|inner| inner.layers.rename_layer(id, name))
    }

    /// Move a layer one step and restack.
    pub fn move_layer(&self, id: &LayerId, direction: LayerDirection) -> bool {
        self.write_layers(|inner| inner.layers.move_layer(&mut inner.scene, id, direction))
    }

    /// Make a layer active.
    pub fn set_active_layer(&self, id: &LayerId) -> bool {
        self.write_layers(|inner| inner.layers.set_active_layer(id))
    }

    /// Resolve a layer by id or name, creating it when missing.
    pub fn find_or_create_layer(&self, name_or_id: &str) -> LayerId {
        self.write_layers(|inner| inner.layers.find_or_create_layer(name_or_id))
    }

    /// Move a shape onto a layer.
    pub fn assign_shape_to_layer(&self, shape_id: ShapeId, layer_id: &LayerId) -> bool {
        self.write(|inner| {
            inner
                .layers
                .assign_shape_to_layer(&mut inner.scene, shape_id, layer_id)
        })
    }

    /// The layer index, memoized per scene revision.
    #[must_use]
    pub fn index(&self) -> LayerIndex {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let revision = inner.scene.revision();
        if let Some((cached, index)) = &inner.index_cache {
            if *cached == revision {
                return index.clone();
            }
        }
        let index = inner.layers.index(&inner.scene);
        inner.index_cache = Some((revision, index.clone()));
        index
    }

    /// Shapes on a layer, back to front.
    #[must_use]
    pub fn shapes_on(&self, layer: &LayerId) -> Vec<ShapeId> {
        self.index().shapes_on(layer).to_vec()
    }

    /// The layer a shape belongs to.
    #[must_use]
    pub fn layer_of(&self, shape: ShapeId) -> Option<LayerId> {
        self.index().layer_of(shape).cloned()
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Serialize the canvas (including layer metadata) to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> CanvasResult<String> {
        self.read(|inner| inner.scene.to_json())
    }

    /// Replace the canvas with a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed. The current canvas
    /// is left untouched in that case.
    pub fn load_json(&self, json: &str) -> CanvasResult<()> {
        let scene = Scene::from_json(json)?;
        self.replace_scene(scene);
        Ok(())
    }

    /// Replace the canvas, restoring layers from page metadata and repairing
    /// shape tags. Loading is not broadcast as a mutation.
    pub fn replace_scene(&self, mut scene: Scene) {
        let layers = LayerRegistry::from_page_meta(scene.page_meta(LAYERS_META_KEY));
        layers.reconcile(&mut scene);
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.scene = scene;
        inner.layers = layers;
        inner.index_cache = None;
        inner.persist_layers();
        let _ = inner.scene.take_changes();
        tracing::debug!(shapes = inner.scene.shape_count(), "Canvas loaded");
    }

    /// Load a canvas from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_path(&self, path: &Path) -> CanvasResult<()> {
        let json = std::fs::read_to_string(path)?;
        self.load_json(&json)
    }

    /// Write the canvas to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_path(&self, path: &Path) -> CanvasResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{MutationKind, ShapeKind};

    fn text(content: &str) -> Shape {
        Shape::new(ShapeKind::Text {
            content: content.to_string(),
            font_size: 16.0,
            color: "#000000".to_string(),
        })
    }

    #[test]
    fn test_create_tags_active_layer() {
        let store = CanvasStore::new();
        let layer = store.add_layer();
        let id = store.create_shape(text("hi")).expect("create");
        assert_eq!(store.layer_of(id), Some(layer.clone()));
        assert_eq!(store.shapes_on(&layer), vec![id]);
    }

    #[test]
    fn test_events_are_user_without_latch() {
        let store = CanvasStore::new();
        let mut rx = store.subscribe();
        let id = store.create_shape(text("hi")).expect("create");
        let event = rx.try_recv().expect("event");
        assert_eq!(event.kind, MutationKind::Created);
        assert_eq!(event.shape_id, Some(id));
        assert_eq!(event.origin, Origin::User);
    }

    #[test]
    fn test_events_are_engine_inside_write_scope() {
        let store = CanvasStore::with_scene(
            Scene::new(800.0, 600.0),
            WriteLatch::new(Duration::ZERO),
        );
        let mut rx = store.subscribe();
        {
            let _scope = store.latch().acquire();
            store.create_shape(text("ai")).expect("create");
        }
        let event = rx.try_recv().expect("event");
        assert_eq!(event.origin, Origin::Engine);
        store.create_shape(text("user")).expect("create");
        assert_eq!(rx.try_recv().expect("event").origin, Origin::User);
    }

    #[test]
    fn test_layer_ops_persist_into_page_meta() {
        let store = CanvasStore::new();
        let layer = store.add_layer();
        store.rename_layer(&layer, "Sky");

        let restored = CanvasStore::new();
        restored
            .load_json(&store.to_json().expect("json"))
            .expect("load");
        let names: Vec<String> = restored.layers().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["Layer 1".to_string(), "Sky".to_string()]);
        assert_eq!(restored.active_layer().id, layer);
    }

    #[test]
    fn test_index_tracks_revision() {
        let store = CanvasStore::new();
        let first = store.active_layer().id;
        let a = store.create_shape(text("a")).expect("create");
        assert_eq!(store.shapes_on(&first), vec![a]);
        let b = store.create_shape(text("b")).expect("create");
        assert_eq!(store.shapes_on(&first), vec![a, b]);
        store.delete_shape(a).expect("delete");
        assert_eq!(store.shapes_on(&first), vec![b]);
    }

    #[test]
    fn test_load_reconciles_untagged_shapes() {
        let mut scene = Scene::new(800.0, 600.0);
        let id = scene.add_shape(text("legacy")).expect("add");
        let store = CanvasStore::new();
        let mut rx = store.subscribe();
        store
            .load_json(&scene.to_json().expect("json"))
            .expect("load");
        assert_eq!(store.layer_of(id), Some(store.active_layer().id));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bad_json_leaves_canvas_untouched() {
        let store = CanvasStore::new();
        store.create_shape(text("keep")).expect("create");
        assert!(store.load_json("{not json").is_err());
        assert_eq!(store.shape_count(), 1);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("board.json");
        let store = CanvasStore::new();
        let id = store.create_shape(text("saved")).expect("create");
        store.save_to_path(&path).expect("save");

        let loaded = CanvasStore::new();
        loaded.load_from_path(&path).expect("load");
        assert!(loaded.get_shape(id).is_some());
    }
}
