//! Mutation events emitted by the canvas.

use serde::{Deserialize, Serialize};

use crate::ShapeId;

/// What happened to a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// Shape was added to the canvas.
    Created,
    /// Shape content, transform or visual state changed.
    Updated,
    /// Shape was removed from the canvas.
    Deleted,
    /// Page-level metadata (layers, settings) changed.
    PageMeta,
}

/// Who caused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A user edit (or any write made outside an engine write scope).
    User,
    /// A write made by the engine while the write latch was held.
    Engine,
}

/// A single committed change to the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Kind of change.
    pub kind: MutationKind,
    /// Affected shape (`None` for page metadata changes).
    pub shape_id: Option<ShapeId>,
    /// Who made the change.
    pub origin: Origin,
    /// Scene revision after the change.
    pub revision: u64,
}

impl MutationEvent {
    /// Whether the event came from a user edit.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.origin == Origin::User
    }

    /// Whether the event touched a shape rather than page metadata.
    #[must_use]
    pub fn is_shape_change(&self) -> bool {
        self.kind != MutationKind::PageMeta
    }
}

/// A change recorded by the scene before it is stamped with an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Change {
    pub kind: MutationKind,
    pub shape_id: Option<ShapeId>,
    pub revision: u64,
}

impl Change {
    pub(crate) fn stamp(self, origin: Origin) -> MutationEvent {
        MutationEvent {
            kind: self.kind,
            shape_id: self.shape_id,
            origin,
            revision: self.revision,
        }
    }
}
