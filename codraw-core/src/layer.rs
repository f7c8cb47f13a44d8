//! Layer registry: named, ordered layers and the shapes that belong to them.
//!
//! Layer membership lives on each shape as `meta.layer_id`. The registry owns
//! the layer list (order, visibility, lock, active layer) and derives the
//! layer to shape index from the scene on demand, so the index cannot drift
//! from the canvas.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Scene, Shape, ShapeId};

/// Page metadata key holding the persisted registry.
pub const LAYERS_META_KEY: &str = "layers";

const AUTO_NAME_PREFIX: &str = "layer";

/// Unique identifier for a layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    /// Generate a fresh layer id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("layer-{}", Uuid::new_v4()))
    }

    /// Wrap an existing id string.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer id.
    pub id: LayerId,
    /// Display name.
    pub name: String,
    /// Whether shapes on this layer are shown.
    #[serde(default = "default_true")]
    pub is_visible: bool,
    /// Whether shapes on this layer are locked against edits.
    #[serde(default)]
    pub is_locked: bool,
}

fn default_true() -> bool {
    true
}

impl Layer {
    /// Create a visible, unlocked layer.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            is_visible: true,
            is_locked: false,
        }
    }

    /// Opacity and lock a shape on this layer should carry.
    ///
    /// Pending shapes stay locked whatever the layer state.
    #[must_use]
    pub fn visual_state(&self, pending: bool) -> (f32, bool) {
        let opacity = if self.is_visible { 1.0 } else { 0.0 };
        (opacity, self.is_locked || pending)
    }
}

/// Direction for [`LayerRegistry::move_layer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerDirection {
    /// One step toward the front.
    Up,
    /// One step toward the back.
    Down,
}

/// Layer to shape mapping, projected from shape tags in stacking order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerIndex {
    entries: Vec<(LayerId, Vec<ShapeId>)>,
}

impl LayerIndex {
    /// Build the index for `layers` from the tags found in `scene`.
    ///
    /// Shapes without a tag, or tagged with an unknown layer, are not indexed.
    #[must_use]
    pub fn project(layers: &[Layer], scene: &Scene) -> Self {
        let mut entries: Vec<(LayerId, Vec<ShapeId>)> =
            layers.iter().map(|l| (l.id.clone(), Vec::new())).collect();
        for shape in scene.shapes() {
            let Some(tag) = shape.layer_id() else {
                continue;
            };
            if let Some((_, ids)) = entries.iter_mut().find(|(id, _)| id == tag) {
                ids.push(shape.id);
            }
        }
        Self { entries }
    }

    /// Shapes on a layer, back to front. Empty for unknown layers.
    #[must_use]
    pub fn shapes_on(&self, layer: &LayerId) -> &[ShapeId] {
        self.entries
            .iter()
            .find(|(id, _)| id == layer)
            .map_or(&[], |(_, ids)| ids.as_slice())
    }

    /// The layer a shape is indexed under.
    #[must_use]
    pub fn layer_of(&self, shape: ShapeId) -> Option<&LayerId> {
        self.entries
            .iter()
            .find(|(_, ids)| ids.contains(&shape))
            .map(|(id, _)| id)
    }

    /// Iterate entries in layer order.
    pub fn iter(&self) -> impl Iterator<Item = (&LayerId, &[ShapeId])> {
        self.entries.iter().map(|(id, ids)| (id, ids.as_slice()))
    }
}

/// Ordered layers plus the active layer and the auto-number high-water mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRegistry {
    layers: Vec<Layer>,
    active: LayerId,
    #[serde(default)]
    high_water: u32,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased, trimmed name with a leading "layer" word removed.
fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_prefix(AUTO_NAME_PREFIX) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
            rest.trim().to_string()
        }
        _ => lower,
    }
}

/// Numeric suffix of an auto-style name ("Layer 7" -> 7).
fn auto_number(name: &str) -> Option<u32> {
    let lower = name.trim().to_lowercase();
    lower
        .strip_prefix(AUTO_NAME_PREFIX)?
        .trim()
        .parse::<u32>()
        .ok()
}

impl LayerRegistry {
    /// A registry with a single active "Layer 1".
    #[must_use]
    pub fn new() -> Self {
        let first = Layer::new("Layer 1");
        Self {
            active: first.id.clone(),
            layers: vec![first],
            high_water: 1,
        }
    }

    /// Restore from the page metadata value, falling back to a fresh registry
    /// when the value is missing or unusable.
    #[must_use]
    pub fn from_page_meta(value: Option<&serde_json::Value>) -> Self {
        let Some(value) = value else {
            return Self::new();
        };
        match serde_json::from_value::<Self>(value.clone()) {
            Ok(mut registry) if !registry.layers.is_empty() => {
                if registry.layer(&registry.active).is_none() {
                    registry.active = registry.layers[0].id.clone();
                }
                registry.bump_high_water();
                registry
            }
            Ok(_) => Self::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable layer metadata");
                Self::new()
            }
        }
    }

    /// Value stored under [`LAYERS_META_KEY`].
    #[must_use]
    pub fn to_page_meta(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn bump_high_water(&mut self) {
        let max = self
            .layers
            .iter()
            .filter_map(|l| auto_number(&l.name))
            .max()
            .unwrap_or(0);
        self.high_water = self.high_water.max(max);
    }

    fn position(&self, id: &LayerId) -> Option<usize> {
        self.layers.iter().position(|l| &l.id == id)
    }

    /// All layers, back to front.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Look up a layer.
    #[must_use]
    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| &l.id == id)
    }

    /// The active layer.
    #[must_use]
    pub fn active_layer(&self) -> &Layer {
        self.layer(&self.active)
            .unwrap_or_else(|| &self.layers[0])
    }

    /// Highest auto-number ever issued.
    #[must_use]
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    /// Make `id` the active layer.
    pub fn set_active_layer(&mut self, id: &LayerId) -> bool {
        if self.layer(id).is_none() || &self.active == id {
            return false;
        }
        self.active = id.clone();
        true
    }

    /// Append "Layer N" and activate it. N is never reused.
    pub fn add_layer(&mut self) -> LayerId {
        self.bump_high_water();
        self.high_water += 1;
        let layer = Layer::new(format!("Layer {}", self.high_water));
        let id = layer.id.clone();
        self.layers.push(layer);
        self.active = id.clone();
        tracing::debug!(layer_id = %id, "Layer added");
        id
    }

    /// Rename a layer.
    pub fn rename_layer(&mut self, id: &LayerId, name: &str) -> bool {
        let Some(layer) = self.layers.iter_mut().find(|l| &l.id == id) else {
            return false;
        };
        if layer.name == name {
            return false;
        }
        layer.name = name.to_string();
        self.bump_high_water();
        true
    }

    /// Find a layer by exact id or by normalized name, creating it (not
    /// activated) when nothing matches. A blank name resolves to the active layer.
    pub fn find_or_create_layer(&mut self, name_or_id: &str) -> LayerId {
        let trimmed = name_or_id.trim();
        if trimmed.is_empty() {
            return self.active.clone();
        }
        if let Some(layer) = self.layers.iter().find(|l| l.id.as_str() == trimmed) {
            return layer.id.clone();
        }
        let wanted = normalize_name(trimmed);
        if let Some(layer) = self.layers.iter().find(|l| normalize_name(&l.name) == wanted) {
            return layer.id.clone();
        }
        let layer = Layer::new(trimmed);
        let id = layer.id.clone();
        self.layers.push(layer);
        self.bump_high_water();
        tracing::debug!(layer_id = %id, name = trimmed, "Layer created by name");
        id
    }

    /// Delete a layer and every shape on it. The only layer cannot be deleted.
    ///
    /// When the active layer goes, the layer that followed it (or the new last
    /// layer) becomes active.
    pub fn delete_layer(&mut self, scene: &mut Scene, id: &LayerId) -> bool {
        if self.layers.len() <= 1 {
            return false;
        }
        let Some(pos) = self.position(id) else {
            return false;
        };
        let doomed = LayerIndex::project(&self.layers, scene)
            .shapes_on(id)
            .to_vec();
        for shape_id in &doomed {
            let _ = scene.remove_shape(shape_id);
        }
        self.layers.remove(pos);
        if &self.active == id {
            let next = pos.min(self.layers.len() - 1);
            self.active = self.layers[next].id.clone();
        }
        tracing::debug!(layer_id = %id, removed = doomed.len(), "Layer deleted");
        true
    }

    /// Flip visibility and apply it to every shape on the layer.
    ///
    /// Returns the new visibility.
    pub fn toggle_visibility(&mut self, scene: &mut Scene, id: &LayerId) -> Option<bool> {
        let layer = self.layers.iter_mut().find(|l| &l.id == id)?;
        layer.is_visible = !layer.is_visible;
        let visible = layer.is_visible;
        self.apply_visual_state(scene, id);
        Some(visible)
    }

    /// Flip the lock flag and apply it to every shape on the layer.
    ///
    /// Returns the new lock state.
    pub fn toggle_lock(&mut self, scene: &mut Scene, id: &LayerId) -> Option<bool> {
        let layer = self.layers.iter_mut().find(|l| &l.id == id)?;
        layer.is_locked = !layer.is_locked;
        let locked = layer.is_locked;
        self.apply_visual_state(scene, id);
        Some(locked)
    }

    fn apply_visual_state(&self, scene: &mut Scene, id: &LayerId) {
        let Some(layer) = self.layer(id) else {
            return;
        };
        let ids = LayerIndex::project(&self.layers, scene)
            .shapes_on(id)
            .to_vec();
        for shape_id in ids {
            let _ = scene.update_shape(shape_id, |shape| {
                let (opacity, locked) = layer.visual_state(shape.is_pending());
                shape.opacity = opacity;
                shape.is_locked = locked;
            });
        }
    }

    /// Move a layer one step and restack the canvas so that layer order holds.
    pub fn move_layer(&mut self, scene: &mut Scene, id: &LayerId, direction: LayerDirection) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        let target = match direction {
            LayerDirection::Up if pos + 1 < self.layers.len() => pos + 1,
            LayerDirection::Down if pos > 0 => pos - 1,
            _ => return false,
        };
        self.layers.swap(pos, target);
        self.restack(scene);
        true
    }

    /// Raise each layer's shapes to the top, visiting layers back to front.
    pub fn restack(&self, scene: &mut Scene) {
        let index = LayerIndex::project(&self.layers, scene);
        for (_, ids) in index.iter() {
            scene.bring_to_front(ids);
        }
    }

    /// Move a shape onto a layer and give it that layer's visual state.
    pub fn assign_shape_to_layer(
        &self,
        scene: &mut Scene,
        shape_id: ShapeId,
        layer_id: &LayerId,
    ) -> bool {
        let Some(layer) = self.layer(layer_id) else {
            return false;
        };
        let before = scene.revision();
        let _ = scene.update_shape(shape_id, |shape| {
            shape.meta.layer_id = Some(layer_id.clone());
            let (opacity, locked) = layer.visual_state(shape.is_pending());
            shape.opacity = opacity;
            shape.is_locked = locked;
        });
        scene.revision() != before
    }

    /// Registration hook for a shape about to be committed.
    ///
    /// Keeps an explicit tag naming a known layer, otherwise tags the active
    /// layer, then applies that layer's visibility and lock.
    pub fn register_shape(&self, shape: &mut Shape) {
        let layer = shape
            .layer_id()
            .and_then(|id| self.layer(id))
            .unwrap_or_else(|| self.active_layer());
        let (opacity, locked) = layer.visual_state(shape.is_pending());
        if !layer.is_visible {
            shape.opacity = opacity;
        }
        shape.is_locked = shape.is_locked || locked;
        shape.meta.layer_id = Some(layer.id.clone());
    }

    /// Project the layer index from `scene`.
    #[must_use]
    pub fn index(&self, scene: &Scene) -> LayerIndex {
        LayerIndex::project(&self.layers, scene)
    }

    /// Repair shape tags after a load.
    ///
    /// Untagged shapes join the active layer, dangling tags move to the first
    /// layer, and every shape gets its layer's visual state. Returns the number
    /// of shapes whose tag was repaired.
    pub fn reconcile(&self, scene: &mut Scene) -> usize {
        let first = self.layers[0].id.clone();
        let ids: Vec<ShapeId> = scene.shape_ids().to_vec();
        let mut repaired = 0;
        for shape_id in ids {
            let Some(shape) = scene.get_shape(shape_id) else {
                continue;
            };
            let target = match shape.layer_id() {
                None => self.active.clone(),
                Some(tag) if self.layer(tag).is_none() => first.clone(),
                Some(tag) => tag.clone(),
            };
            if shape.layer_id() != Some(&target) {
                repaired += 1;
            }
            let Some(layer) = self.layer(&target) else {
                continue;
            };
            let _ = scene.update_shape(shape_id, |shape| {
                shape.meta.layer_id = Some(target.clone());
                let (opacity, locked) = layer.visual_state(shape.is_pending());
                if !layer.is_visible || shape.is_pending() {
                    shape.opacity = opacity;
                }
                if locked {
                    shape.is_locked = true;
                }
            });
        }
        if repaired > 0 {
            tracing::info!(repaired, "Reconciled layer tags");
        }
        repaired
    }
}
