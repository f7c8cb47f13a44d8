//! Integration tests for canvas snapshots (codraw-renderer).
//!
//! Covers the generation snapshot, the full-canvas capture used by workspace
//! analysis, preview thumbnails, and staged images flowing back through the
//! decode / strip / encode path.

use codraw_core::{CanvasStore, GeoKind, Rect, Shape, ShapeKind, Transform};
use codraw_renderer::{
    decode_image, decode_image_source, encode_png, strip_background, to_data_uri, DecodedImage,
    ImageFormat, RasterFormat, Rasterizer, SnapshotRegion, SnapshotRequest, SvgRasterizer,
    DEFAULT_BACKGROUND_THRESHOLD,
};

fn ellipse(x: f32, y: f32) -> Shape {
    Shape::new(ShapeKind::Geo {
        geo: GeoKind::Ellipse,
        color: "#0000ff".to_string(),
    })
    .with_transform(Transform {
        x,
        y,
        width: 200.0,
        height: 100.0,
        rotation: 0.0,
    })
}

/// A generated image: a black square on a white page.
fn generated_png(size: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let inside = x >= size / 4 && x < size * 3 / 4 && y >= size / 4 && y < size * 3 / 4;
            if inside {
                data.extend_from_slice(&[0, 0, 0, 255]);
            } else {
                data.extend_from_slice(&[255, 255, 255, 255]);
            }
        }
    }
    encode_png(&DecodedImage {
        width: size,
        height: size,
        data,
        format: ImageFormat::Png,
    })
    .expect("encode")
}

#[test]
fn test_generation_snapshot_of_store_scene() {
    let store = CanvasStore::new();
    store.create_shape(ellipse(100.0, 100.0)).expect("create");
    let image = SvgRasterizer::new()
        .rasterize(&store.scene(), &SnapshotRequest::viewport_jpeg(400, 75))
        .expect("rasterize")
        .expect("content");
    assert_eq!((image.width, image.height), (400, 300));
    assert_eq!(image.mime, "image/jpeg");
}

#[test]
fn test_full_canvas_reaches_beyond_viewport() {
    let store = CanvasStore::new();
    store.create_shape(ellipse(3000.0, 3000.0)).expect("create");

    let rasterizer = SvgRasterizer::new();
    let scene = store.scene();
    assert!(rasterizer
        .rasterize(&scene, &SnapshotRequest::viewport_jpeg(400, 75))
        .expect("rasterize")
        .is_none());

    let full = rasterizer
        .rasterize(&scene, &SnapshotRequest::full_canvas(1024, RasterFormat::Png))
        .expect("rasterize")
        .expect("content");
    assert_eq!((full.width, full.height), (248, 148));
}

#[test]
fn test_explicit_area_capture() {
    let store = CanvasStore::new();
    store.create_shape(ellipse(0.0, 0.0)).expect("create");
    let request = SnapshotRequest {
        region: SnapshotRegion::Area {
            rect: Rect::new(0.0, 0.0, 50.0, 50.0),
        },
        ..SnapshotRequest::thumbnail(64)
    };
    let image = SvgRasterizer::new()
        .rasterize(&store.scene(), &request)
        .expect("rasterize")
        .expect("content");
    assert_eq!((image.width, image.height), (50, 50));
}

#[test]
fn test_staged_image_roundtrip_keeps_only_ink() {
    let png = generated_png(16);
    let mut decoded = decode_image(&png).expect("decode");
    let cleared = strip_background(&mut decoded, DEFAULT_BACKGROUND_THRESHOLD);
    assert_eq!(cleared, 16 * 16 - 8 * 8);

    let uri = to_data_uri("image/png", &encode_png(&decoded).expect("encode"));
    let reloaded = decode_image_source(&uri).expect("reload");
    let opaque = reloaded.data.chunks_exact(4).filter(|p| p[3] == 255).count();
    assert_eq!(opaque, 8 * 8);
}

#[test]
fn test_staged_image_renders_in_snapshot() {
    let store = CanvasStore::new();
    let uri = to_data_uri("image/png", &generated_png(32));
    let image = Shape::new(ShapeKind::Image {
        src: uri,
        pixel_width: 32,
        pixel_height: 32,
    })
    .with_transform(Transform {
        x: 0.0,
        y: 0.0,
        width: 64.0,
        height: 64.0,
        rotation: 0.0,
    });
    store.create_shape(image).expect("create");

    let out = SvgRasterizer::new()
        .rasterize(&store.scene(), &SnapshotRequest::thumbnail(256))
        .expect("rasterize")
        .expect("content");
    let decoded = decode_image(&out.bytes).expect("decode thumbnail");
    // Somewhere in the middle the black square must show through.
    assert!(decoded
        .data
        .chunks_exact(4)
        .any(|p| p[0] < 32 && p[1] < 32 && p[2] < 32 && p[3] == 255));
}
