//! Canvas shapes - the objects users and the AI place on the canvas.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Rect;
use crate::layer::LayerId;
use crate::{CanvasError, CanvasResult};

/// Unique identifier for a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(Uuid);

impl ShapeId {
    /// Create a new unique shape ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse a shape ID from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidShapeId`] if the string is not a UUID.
    pub fn parse(value: &str) -> CanvasResult<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| CanvasError::InvalidShapeId(format!("{value}: {e}")))
    }
}

impl Default for ShapeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outline kinds for geometric shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoKind {
    /// Axis-aligned rectangle.
    Rectangle,
    /// Ellipse inscribed in the bounds.
    Ellipse,
}

/// The type of content a shape contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ShapeKind {
    /// A raster image, stored inline as a data URI.
    Image {
        /// Image source (`data:image/png;base64,...`).
        src: String,
        /// Intrinsic pixel width.
        pixel_width: u32,
        /// Intrinsic pixel height.
        pixel_height: u32,
    },

    /// A text label.
    Text {
        /// Text content.
        content: String,
        /// Font size in pixels.
        font_size: f32,
        /// Text color as hex.
        color: String,
    },

    /// A freehand stroke. Points are relative to the shape origin.
    Draw {
        /// Stroke points.
        points: Vec<(f32, f32)>,
        /// Stroke color as hex.
        color: String,
        /// Stroke width in pixels.
        stroke_width: f32,
    },

    /// A geometric outline filling the shape bounds.
    Geo {
        /// Outline kind.
        geo: GeoKind,
        /// Stroke color as hex.
        color: String,
    },
}

/// Position and size of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// X position (canvas units from the origin).
    pub x: f32,
    /// Y position (canvas units from the origin).
    pub y: f32,
    /// Width in canvas units.
    pub width: f32,
    /// Height in canvas units.
    pub height: f32,
    /// Rotation in radians.
    #[serde(default)]
    pub rotation: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            rotation: 0.0,
        }
    }
}

impl Transform {
    /// Axis-aligned bounds of this transform (rotation ignored).
    #[must_use]
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

impl From<Rect> for Transform {
    fn from(rect: Rect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            rotation: 0.0,
        }
    }
}

/// Engine bookkeeping carried on every shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeMeta {
    /// Owning layer. This tag is the source of truth for layer membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<LayerId>,
    /// Whether the shape is a staged AI generation awaiting accept/reject.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

/// A canvas shape with content, transform and visual state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    /// Unique identifier.
    pub id: ShapeId,
    /// Shape content type.
    pub kind: ShapeKind,
    /// Position and size.
    pub transform: Transform,
    /// Opacity from 0.0 (hidden) to 1.0.
    #[serde(default = "Shape::default_opacity")]
    pub opacity: f32,
    /// Whether the shape is locked against edits.
    #[serde(default)]
    pub is_locked: bool,
    /// Layer and staging metadata.
    #[serde(default)]
    pub meta: ShapeMeta,
}

impl Shape {
    /// Create a new shape with the given kind.
    #[must_use]
    pub fn new(kind: ShapeKind) -> Self {
        Self {
            id: ShapeId::new(),
            kind,
            transform: Transform::default(),
            opacity: 1.0,
            is_locked: false,
            meta: ShapeMeta::default(),
        }
    }

    const fn default_opacity() -> f32 {
        1.0
    }

    /// Set the transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Request a destination layer. The registration hook honours it if the layer exists.
    #[must_use]
    pub fn on_layer(mut self, layer_id: LayerId) -> Self {
        self.meta.layer_id = Some(layer_id);
        self
    }

    /// Owning layer, if tagged.
    #[must_use]
    pub fn layer_id(&self) -> Option<&LayerId> {
        self.meta.layer_id.as_ref()
    }

    /// Whether this shape is a staged generation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.meta.pending
    }

    /// Check if a point (in canvas coordinates) is within this shape.
    #[must_use]
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.transform.bounds().contains(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_id_roundtrip_through_string() {
        let id = ShapeId::new();
        let parsed = ShapeId::parse(&id.to_string()).expect("valid uuid");
        assert_eq!(id, parsed);
        assert!(ShapeId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_pending_flag_is_omitted_when_false() {
        let shape = Shape::new(ShapeKind::Geo {
            geo: GeoKind::Rectangle,
            color: "#000".to_string(),
        });
        let json = serde_json::to_string(&shape).expect("serialize");
        assert!(!json.contains("pending"));
        assert!(!json.contains("layer_id"));
    }

    #[test]
    fn test_contains_point() {
        let shape = Shape::new(ShapeKind::Text {
            content: "hi".to_string(),
            font_size: 12.0,
            color: "#000".to_string(),
        })
        .with_transform(Transform {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 20.0,
            rotation: 0.0,
        });
        assert!(shape.contains_point(30.0, 15.0));
        assert!(!shape.contains_point(5.0, 15.0));
    }
}
