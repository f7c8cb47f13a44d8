//! Scene graph for managing canvas shapes.
//!
//! The scene keeps shapes in stacking order (back to front), the viewport
//! currently shown to the user, and page-level metadata. Every committed change
//! bumps the revision and is journaled so the owning store can broadcast it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{Change, MutationKind};
use crate::geometry::Rect;
use crate::{CanvasError, CanvasResult, Shape, ShapeId};

/// A scene containing all canvas shapes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    /// All shapes in the scene, indexed by ID.
    shapes: HashMap<ShapeId, Shape>,
    /// Stacking order, back to front.
    order: Vec<ShapeId>,
    /// Visible region of the infinite canvas.
    viewport: Rect,
    /// Page-level metadata (layer registry, host settings).
    #[serde(default)]
    page_meta: serde_json::Map<String, serde_json::Value>,
    /// Monotonic revision, bumped on every change.
    #[serde(default)]
    revision: u64,
    /// Changes not yet drained by the store.
    #[serde(skip)]
    changes: Vec<Change>,
}

impl Scene {
    /// Create a new empty scene with the given viewport size at the origin.
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        Self::with_viewport(Rect::new(0.0, 0.0, width, height))
    }

    /// Create a new empty scene showing `viewport`.
    #[must_use]
    pub fn with_viewport(viewport: Rect) -> Self {
        Self {
            viewport,
            ..Self::default()
        }
    }

    fn record(&mut self, kind: MutationKind, shape_id: Option<ShapeId>) {
        self.revision += 1;
        self.changes.push(Change {
            kind,
            shape_id,
            revision: self.revision,
        });
    }

    /// Add a shape on top of the stack.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::DuplicateShape`] if the id is already present.
    pub fn add_shape(&mut self, shape: Shape) -> CanvasResult<ShapeId> {
        let id = shape.id;
        if self.shapes.contains_key(&id) {
            return Err(CanvasError::DuplicateShape(id.to_string()));
        }
        self.order.push(id);
        self.shapes.insert(id, shape);
        self.record(MutationKind::Created, Some(id));
        Ok(id)
    }

    /// Remove a shape from the scene.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape is not found.
    pub fn remove_shape(&mut self, id: &ShapeId) -> CanvasResult<Shape> {
        let shape = self
            .shapes
            .remove(id)
            .ok_or_else(|| CanvasError::ShapeNotFound(id.to_string()))?;
        self.order.retain(|sid| sid != id);
        self.record(MutationKind::Deleted, Some(*id));
        Ok(shape)
    }

    /// Mutate a shape in place. An `Updated` change is recorded only when the
    /// closure actually changed something.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape is not found.
    pub fn update_shape<F>(&mut self, id: ShapeId, f: F) -> CanvasResult<()>
    where
        F: FnOnce(&mut Shape),
    {
        let shape = self
            .shapes
            .get_mut(&id)
            .ok_or_else(|| CanvasError::ShapeNotFound(id.to_string()))?;
        let before = shape.clone();
        f(shape);
        // The id is the map key; it must not change underneath us.
        shape.id = id;
        if *shape != before {
            self.record(MutationKind::Updated, Some(id));
        }
        Ok(())
    }

    /// Get a shape by ID.
    #[must_use]
    pub fn get_shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    /// Whether a shape exists.
    #[must_use]
    pub fn contains(&self, id: ShapeId) -> bool {
        self.shapes.contains_key(&id)
    }

    /// All shapes, back to front.
    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.order.iter().filter_map(|id| self.shapes.get(id))
    }

    /// All shape ids, back to front.
    #[must_use]
    pub fn shape_ids(&self) -> &[ShapeId] {
        &self.order
    }

    /// Raise `ids` to the top of the stack, keeping their relative order.
    ///
    /// Unknown ids are skipped.
    pub fn bring_to_front(&mut self, ids: &[ShapeId]) {
        let raised: Vec<ShapeId> = ids
            .iter()
            .copied()
            .filter(|id| self.shapes.contains_key(id))
            .collect();
        if raised.is_empty() {
            return;
        }
        self.order.retain(|id| !raised.contains(id));
        for id in raised {
            if self.order.contains(&id) {
                continue;
            }
            self.order.push(id);
            self.record(MutationKind::Updated, Some(id));
        }
    }

    /// The visible region.
    #[must_use]
    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Set the visible region.
    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    /// Read a page metadata value.
    #[must_use]
    pub fn page_meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.page_meta.get(key)
    }

    /// Write a page metadata value. Unchanged values record nothing.
    pub fn set_page_meta(&mut self, key: &str, value: serde_json::Value) {
        if self.page_meta.get(key) == Some(&value) {
            return;
        }
        self.page_meta.insert(key.to_string(), value);
        self.record(MutationKind::PageMeta, None);
    }

    /// Union of the bounds of all shapes, or `None` for an empty scene.
    #[must_use]
    pub fn content_bounds(&self) -> Option<Rect> {
        self.shapes()
            .map(|s| s.transform.bounds())
            .reduce(|acc, r| acc.union(&r))
    }

    /// Get the number of shapes in the scene.
    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Check if the scene is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Current revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Remove every shape.
    pub fn clear(&mut self) {
        let ids = std::mem::take(&mut self.order);
        self.shapes.clear();
        for id in ids {
            self.record(MutationKind::Deleted, Some(id));
        }
    }

    pub(crate) fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }

    /// Serialize the scene to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> CanvasResult<String> {
        serde_json::to_string(self).map_err(CanvasError::Serialization)
    }

    /// Serialize the scene to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> CanvasResult<serde_json::Value> {
        serde_json::to_value(self).map_err(CanvasError::Serialization)
    }

    /// Deserialize a scene from JSON.
    ///
    /// Stacking entries without a shape are dropped and shapes missing from the
    /// stacking order are appended on top.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> CanvasResult<Self> {
        let mut scene: Self = serde_json::from_str(json).map_err(CanvasError::Serialization)?;
        let shapes = &scene.shapes;
        scene.order.retain(|id| shapes.contains_key(id));
        scene.order.dedup();
        let mut missing: Vec<ShapeId> = scene
            .shapes
            .keys()
            .filter(|id| !scene.order.contains(id))
            .copied()
            .collect();
        missing.sort();
        scene.order.extend(missing);
        Ok(scene)
    }
}
