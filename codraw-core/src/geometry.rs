//! Rectangles and placement math in canvas coordinates.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in canvas units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

impl Rect {
    /// Create a rectangle.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge.
    #[must_use]
    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// Whether the point lies inside (edges inclusive).
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.max_x() && y >= self.y && y <= self.max_y()
    }

    /// Whether the two rectangles overlap (touching edges count).
    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.max_x()
            && other.x <= self.max_x()
            && self.y <= other.max_y()
            && other.y <= self.max_y()
    }

    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.max_x().max(other.max_x()) - x,
            self.max_y().max(other.max_y()) - y,
        )
    }

    /// Grow the rectangle by `margin` on every side.
    #[must_use]
    pub fn expand(&self, margin: f32) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + margin * 2.0,
            self.height + margin * 2.0,
        )
    }

    /// Whether the rectangle has no area.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Uniformly scale a `width` x `height` image to fit `container`, centered.
///
/// Aspect ratio is preserved; the image may be scaled up or down. Degenerate
/// inputs yield the container itself.
#[must_use]
pub fn fit_centered(width: f32, height: f32, container: &Rect) -> Rect {
    if width <= 0.0 || height <= 0.0 || container.is_empty() {
        return *container;
    }
    let scale = (container.width / width).min(container.height / height);
    let w = width * scale;
    let h = height * scale;
    Rect::new(
        container.x + (container.width - w) / 2.0,
        container.y + (container.height - h) / 2.0,
        w,
        h,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_fit_wide_image_in_tall_viewport() {
        let viewport = Rect::new(100.0, 50.0, 400.0, 800.0);
        let placed = fit_centered(1000.0, 500.0, &viewport);
        assert!(approx(placed.width, 400.0));
        assert!(approx(placed.height, 200.0));
        assert!(approx(placed.x, 100.0));
        assert!(approx(placed.y, 50.0 + 300.0));
    }

    #[test]
    fn test_fit_scales_small_image_up() {
        let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);
        let placed = fit_centered(100.0, 100.0, &viewport);
        assert!(approx(placed.width, 600.0));
        assert!(approx(placed.height, 600.0));
        assert!(approx(placed.x, 100.0));
        assert!(approx(placed.y, 0.0));
    }

    #[test]
    fn test_fit_degenerate_image_returns_container() {
        let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);
        assert_eq!(fit_centered(0.0, 10.0, &viewport), viewport);
    }

    #[test]
    fn test_intersects_and_union() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        let c = Rect::new(50.0, 50.0, 1.0, 1.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        let u = a.union(&c);
        assert!(approx(u.width, 51.0));
        assert!(approx(u.height, 51.0));
    }
}
