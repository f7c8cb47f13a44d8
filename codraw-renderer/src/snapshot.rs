//! Canvas snapshots.
//!
//! Renders a region of a [`Scene`] to JPEG or PNG using an SVG intermediate
//! representation and the resvg/tiny-skia rasterization pipeline. Snapshots
//! feed the generation request, the workspace analysis tool, and the preview
//! thumbnail stored alongside the canvas.

use std::fmt::Write;

use codraw_core::{GeoKind, Rect, Scene, Shape, ShapeKind};
use image::ImageEncoder;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::imaging::to_data_uri;

/// Which part of the canvas to capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotRegion {
    /// The visible viewport.
    Viewport,
    /// The bounds of every included shape, grown by `padding`.
    Content {
        /// Margin around the content in canvas units.
        padding: f32,
    },
    /// An explicit rectangle.
    Area {
        /// Region to capture.
        rect: Rect,
    },
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RasterFormat {
    /// Lossless PNG with alpha.
    Png,
    /// JPEG composited over the background color.
    Jpeg {
        /// Quality 1-100.
        quality: u8,
    },
}

/// Snapshot parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotRequest {
    /// Region to capture.
    pub region: SnapshotRegion,
    /// Largest output dimension in pixels. Regions are only scaled down.
    pub max_dimension: u32,
    /// Output encoding.
    pub format: RasterFormat,
    /// Whether staged (pending) shapes are drawn.
    pub include_pending: bool,
    /// Background color as RGBA bytes.
    pub background: [u8; 4],
}

impl SnapshotRequest {
    /// Viewport capture for a generation request, pending shapes excluded.
    #[must_use]
    pub fn viewport_jpeg(max_dimension: u32, quality: u8) -> Self {
        Self {
            region: SnapshotRegion::Viewport,
            max_dimension,
            format: RasterFormat::Jpeg { quality },
            include_pending: false,
            background: [255, 255, 255, 255],
        }
    }

    /// Whole-canvas capture, pending shapes included.
    #[must_use]
    pub fn full_canvas(max_dimension: u32, format: RasterFormat) -> Self {
        Self {
            region: SnapshotRegion::Content { padding: 24.0 },
            max_dimension,
            format,
            include_pending: true,
            background: [255, 255, 255, 255],
        }
    }

    /// PNG preview of the committed content.
    #[must_use]
    pub fn thumbnail(max_dimension: u32) -> Self {
        Self {
            region: SnapshotRegion::Content { padding: 16.0 },
            max_dimension,
            format: RasterFormat::Png,
            include_pending: false,
            background: [255, 255, 255, 255],
        }
    }
}

impl Default for SnapshotRequest {
    fn default() -> Self {
        Self::viewport_jpeg(1024, 80)
    }
}

/// An encoded raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    /// Encoded bytes.
    pub bytes: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// MIME type of `bytes`.
    pub mime: &'static str,
}

impl RasterImage {
    /// The image as a base64 data URI.
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        to_data_uri(self.mime, &self.bytes)
    }
}

/// Raster export of canvas content.
///
/// Returns `Ok(None)` when the requested region contains nothing to draw, so
/// callers can tell a blank canvas from a failed capture.
pub trait Rasterizer: Send + Sync {
    /// Capture part of `scene`.
    ///
    /// # Errors
    ///
    /// Returns an error if composition or encoding fails.
    fn rasterize(&self, scene: &Scene, request: &SnapshotRequest)
        -> RenderResult<Option<RasterImage>>;
}

/// Rasterizer that composes shapes into SVG and renders them with resvg.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgRasterizer;

impl SvgRasterizer {
    /// Create a rasterizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compose the shapes that fall in `region` into an SVG document.
    ///
    /// Returns `None` when no shape qualifies.
    #[must_use]
    pub fn compose_svg(scene: &Scene, request: &SnapshotRequest) -> Option<(String, u32, u32)> {
        let candidates: Vec<&Shape> = scene
            .shapes()
            .filter(|s| request.include_pending || !s.is_pending())
            .collect();

        let region = match request.region {
            SnapshotRegion::Viewport => scene.viewport(),
            SnapshotRegion::Area { rect } => rect,
            SnapshotRegion::Content { padding } => candidates
                .iter()
                .map(|s| s.transform.bounds())
                .reduce(|acc, r| acc.union(&r))?
                .expand(padding),
        };
        if region.is_empty() {
            return None;
        }

        let visible: Vec<&Shape> = candidates
            .into_iter()
            .filter(|s| s.transform.bounds().intersects(&region))
            .collect();
        if visible.is_empty() {
            return None;
        }

        let (out_w, out_h) = output_dimensions(&region, request.max_dimension);
        let mut svg = String::with_capacity(4096);
        let _ = write!(
            svg,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{out_w}\" height=\"{out_h}\" viewBox=\"{} {} {} {}\" preserveAspectRatio=\"none\">",
            region.x, region.y, region.width, region.height,
        );

        let bg = &request.background;
        let bg_alpha = f32::from(bg[3]) / 255.0;
        let _ = write!(
            svg,
            "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"rgba({},{},{},{})\"/>",
            region.x, region.y, region.width, region.height, bg[0], bg[1], bg[2], bg_alpha,
        );

        for shape in visible {
            render_shape_svg(&mut svg, shape);
        }

        svg.push_str("</svg>");
        Some((svg, out_w, out_h))
    }
}

impl Rasterizer for SvgRasterizer {
    fn rasterize(
        &self,
        scene: &Scene,
        request: &SnapshotRequest,
    ) -> RenderResult<Option<RasterImage>> {
        let Some((svg, width, height)) = Self::compose_svg(scene, request) else {
            return Ok(None);
        };
        let pixmap = rasterize_svg(&svg, width, height)?;
        let image = match request.format {
            RasterFormat::Png => RasterImage {
                bytes: pixmap
                    .encode_png()
                    .map_err(|e| RenderError::Encode(format!("PNG encoding failed: {e}")))?,
                width,
                height,
                mime: "image/png",
            },
            RasterFormat::Jpeg { quality } => RasterImage {
                bytes: encode_jpeg(&pixmap, request.background, quality)?,
                width,
                height,
                mime: "image/jpeg",
            },
        };
        tracing::debug!(width, height, bytes = image.bytes.len(), "Canvas rasterized");
        Ok(Some(image))
    }
}

/// Output size for `region`, scaled down so neither side exceeds `max_dimension`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn output_dimensions(region: &Rect, max_dimension: u32) -> (u32, u32) {
    let longest = region.width.max(region.height);
    let scale = if longest > max_dimension as f32 {
        max_dimension as f32 / longest
    } else {
        1.0
    };
    let w = (region.width * scale).round() as u32;
    let h = (region.height * scale).round() as u32;
    (w.max(1), h.max(1))
}

fn rasterize_svg(svg: &str, width: u32, height: u32) -> RenderResult<tiny_skia::Pixmap> {
    let opt = usvg::Options::default();
    let tree = usvg::Tree::from_str(svg, &opt)
        .map_err(|e| RenderError::Raster(format!("SVG parsing failed: {e}")))?;

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| RenderError::Raster("Failed to create pixmap".to_string()))?;

    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    Ok(pixmap)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_jpeg(pixmap: &tiny_skia::Pixmap, bg: [u8; 4], quality: u8) -> RenderResult<Vec<u8>> {
    let (width, height) = (pixmap.width(), pixmap.height());
    let mut rgb_data = Vec::with_capacity((width * height * 3) as usize);
    // Pixmap data is premultiplied.
    for pixel in pixmap.data().chunks_exact(4) {
        let inv = 1.0 - f32::from(pixel[3]) / 255.0;
        for (&c, &b) in pixel[..3].iter().zip(bg.iter()) {
            let value = f32::from(b).mul_add(inv, f32::from(c));
            rgb_data.push(value.min(255.0) as u8);
        }
    }

    let mut buf = std::io::Cursor::new(Vec::new());
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .write_image(&rgb_data, width, height, image::ExtendedColorType::Rgb8)
        .map_err(|e| RenderError::Encode(format!("JPEG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Render a single shape to SVG.
fn render_shape_svg(svg: &mut String, shape: &Shape) {
    let tf = &shape.transform;
    let opacity = shape.opacity.clamp(0.0, 1.0);
    let rotate = if tf.rotation.abs() < f32::EPSILON {
        String::new()
    } else {
        format!(
            " transform=\"rotate({} {} {})\"",
            tf.rotation.to_degrees(),
            tf.x + tf.width / 2.0,
            tf.y + tf.height / 2.0,
        )
    };

    match &shape.kind {
        ShapeKind::Image { src, .. } => {
            let _ = write!(
                svg,
                "<image x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" opacity=\"{opacity}\" preserveAspectRatio=\"none\" href=\"{}\"{rotate}/>",
                tf.x,
                tf.y,
                tf.width,
                tf.height,
                escape_xml(src),
            );
        }

        ShapeKind::Text {
            content,
            font_size,
            color,
        } => {
            let text_y = tf.y + font_size;
            let _ = write!(
                svg,
                "<text x=\"{}\" y=\"{text_y}\" font-size=\"{font_size}\" fill=\"{}\" opacity=\"{opacity}\" font-family=\"sans-serif\"{rotate}>{}</text>",
                tf.x,
                escape_xml(color),
                escape_xml(content),
            );
        }

        ShapeKind::Draw {
            points,
            color,
            stroke_width,
        } => {
            if points.is_empty() {
                return;
            }
            let mut coords = String::with_capacity(points.len() * 12);
            for (x, y) in points {
                let _ = write!(coords, "{},{} ", tf.x + x, tf.y + y);
            }
            let _ = write!(
                svg,
                "<polyline points=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"{stroke_width}\" stroke-linecap=\"round\" stroke-linejoin=\"round\" opacity=\"{opacity}\"{rotate}/>",
                coords.trim_end(),
                escape_xml(color),
            );
        }

        ShapeKind::Geo { geo, color } => {
            let color = escape_xml(color);
            match geo {
                GeoKind::Rectangle => {
                    let _ = write!(
                        svg,
                        "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"none\" stroke=\"{color}\" stroke-width=\"2\" opacity=\"{opacity}\"{rotate}/>",
                        tf.x, tf.y, tf.width, tf.height,
                    );
                }
                GeoKind::Ellipse => {
                    let _ = write!(
                        svg,
                        "<ellipse cx=\"{}\" cy=\"{}\" rx=\"{}\" ry=\"{}\" fill=\"none\" stroke=\"{color}\" stroke-width=\"2\" opacity=\"{opacity}\"{rotate}/>",
                        tf.x + tf.width / 2.0,
                        tf.y + tf.height / 2.0,
                        tf.width / 2.0,
                        tf.height / 2.0,
                    );
                }
            }
        }
    }
}

/// Escape special XML characters.
fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
