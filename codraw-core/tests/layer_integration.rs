//! Layer Registry Integration Tests
//!
//! Exercises the registry through the shared [`CanvasStore`]:
//! - Layer lifecycle (add, delete, rename, reorder)
//! - Shape membership and visual state propagation
//! - Persistence of layer metadata across reloads
//! - Mutation events driving the activity debouncer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codraw_core::{
    ActivityDebouncer, CanvasStore, DebounceConfig, GeoKind, LayerDirection, Origin, Scene,
    Shape, ShapeKind, Transform, WriteLatch,
};

fn rect_at(x: f32) -> Shape {
    Shape::new(ShapeKind::Geo {
        geo: GeoKind::Rectangle,
        color: "#ff0000".to_string(),
    })
    .with_transform(Transform {
        x,
        y: 0.0,
        width: 50.0,
        height: 50.0,
        rotation: 0.0,
    })
}

// ============================================================================
// Layer Lifecycle
// ============================================================================

#[test]
fn test_at_least_one_layer_always_exists() {
    let store = CanvasStore::new();
    let only = store.active_layer().id;
    assert!(!store.delete_layer(&only));

    let second = store.add_layer();
    assert!(store.delete_layer(&only));
    assert!(!store.delete_layer(&second));
    assert_eq!(store.layers().len(), 1);
}

#[test]
fn test_deleting_layer_removes_its_shapes_only() {
    let store = CanvasStore::new();
    let base = store.active_layer().id;
    let keep = store.create_shape(rect_at(0.0)).expect("create");

    let doomed_layer = store.add_layer();
    let doomed = store.create_shape(rect_at(100.0)).expect("create");

    assert!(store.delete_layer(&doomed_layer));
    assert!(store.get_shape(doomed).is_none());
    assert!(store.get_shape(keep).is_some());
    assert_eq!(store.active_layer().id, base);
}

#[test]
fn test_user_deleting_shape_updates_index() {
    let store = CanvasStore::new();
    let layer = store.active_layer().id;
    let id = store.create_shape(rect_at(0.0)).expect("create");
    store.delete_shape(id).expect("delete");
    assert!(store.shapes_on(&layer).is_empty());
    assert!(store.layer_of(id).is_none());
}

#[test]
fn test_reassignment_keeps_single_membership() {
    let store = CanvasStore::new();
    let first = store.active_layer().id;
    let id = store.create_shape(rect_at(0.0)).expect("create");
    let second = store.add_layer();

    assert!(store.assign_shape_to_layer(id, &second));
    assert!(!store.assign_shape_to_layer(id, &second));

    let index = store.index();
    let memberships = index.iter().filter(|(_, ids)| ids.contains(&id)).count();
    assert_eq!(memberships, 1);
    assert!(store.shapes_on(&first).is_empty());
}

#[test]
fn test_hidden_layer_hides_only_current_members() {
    let store = CanvasStore::new();
    let first = store.active_layer().id;
    let a = store.create_shape(rect_at(0.0)).expect("create");
    let b = store.create_shape(rect_at(60.0)).expect("create");
    let second = store.add_layer();
    store.assign_shape_to_layer(b, &second);

    assert_eq!(store.toggle_visibility(&first), Some(false));
    let opacity = |id| store.get_shape(id).map(|s| s.opacity);
    assert_eq!(opacity(a), Some(0.0));
    assert_eq!(opacity(b), Some(1.0));

    // Moving a shape onto the hidden layer hides it.
    store.assign_shape_to_layer(b, &first);
    assert_eq!(opacity(b), Some(0.0));

    assert_eq!(store.toggle_visibility(&first), Some(true));
    assert_eq!(opacity(a), Some(1.0));
    assert_eq!(opacity(b), Some(1.0));
}

#[test]
fn test_move_layer_down_sends_shapes_back() {
    let store = CanvasStore::new();
    let back = store.active_layer().id;
    let a = store.create_shape(rect_at(0.0)).expect("create");
    let front = store.add_layer();
    let b = store.create_shape(rect_at(10.0)).expect("create");

    assert!(store.move_layer(&front, LayerDirection::Down));
    let order: Vec<_> = store.shapes().into_iter().map(|s| s.id).collect();
    assert_eq!(order, vec![b, a]);
    assert_eq!(store.layers()[0].id, front);
    assert_eq!(store.layers()[1].id, back);
}

#[test]
fn test_ai_named_layers_resolve_without_duplicates() {
    let store = CanvasStore::new();
    let created = store.find_or_create_layer("Layer 2");
    assert_eq!(store.find_or_create_layer("layer 2"), created);
    assert_eq!(store.find_or_create_layer("Layer 2"), created);
    assert_eq!(store.layers().len(), 2);

    // Auto numbering continues past AI-created names.
    let next = store.add_layer();
    assert_eq!(store.layer(&next).map(|l| l.name), Some("Layer 3".to_string()));
}

// ============================================================================
// Persistence of Layer Metadata
// ============================================================================

#[test]
fn test_reload_restores_layers_and_membership() {
    let store = CanvasStore::new();
    let sky = store.find_or_create_layer("Sky");
    let cloud = store.create_shape(rect_at(0.0).on_layer(sky.clone())).expect("create");
    store.toggle_lock(&sky);

    let json = store.to_json().expect("json");
    let reloaded = CanvasStore::new();
    reloaded.load_json(&json).expect("load");

    assert_eq!(reloaded.layer_of(cloud), Some(sky.clone()));
    assert_eq!(reloaded.layer(&sky).map(|l| l.is_locked), Some(true));
    assert_eq!(reloaded.get_shape(cloud).map(|s| s.is_locked), Some(true));
}

#[test]
fn test_dangling_tags_move_to_first_layer_on_load() {
    let store = CanvasStore::new();
    let first = store.active_layer().id;
    let extra = store.add_layer();
    let id = store.create_shape(rect_at(0.0)).expect("create");
    assert_eq!(store.layer_of(id), Some(extra.clone()));

    // Drop the layer from metadata but keep the shape tagged with it.
    let mut scene = store.scene();
    let mut meta = scene.page_meta("layers").cloned().expect("layer meta");
    meta["layers"]
        .as_array_mut()
        .expect("array")
        .retain(|l| l["id"] != serde_json::json!(extra.as_str()));
    meta["active"] = serde_json::json!(first.as_str());
    scene.set_page_meta("layers", meta);

    let reloaded = CanvasStore::with_scene(scene, WriteLatch::default());
    assert_eq!(reloaded.layer_of(id), Some(first));
}

// ============================================================================
// Events and Debouncing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_writes_do_not_trigger_auto_mode() {
    let store = CanvasStore::with_scene(
        Scene::new(800.0, 600.0),
        WriteLatch::new(Duration::from_millis(150)),
    );
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let _debouncer = ActivityDebouncer::spawn(
        store.subscribe(),
        DebounceConfig::user_activity(Duration::from_millis(2000)),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    {
        let _scope = store.latch().acquire();
        store.create_shape(rect_at(0.0)).expect("create");
    }
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    store.create_shape(rect_at(10.0)).expect("create");
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_layer_ops_emit_page_meta_events() {
    let store = CanvasStore::new();
    let mut rx = store.subscribe();
    store.add_layer();
    let event = rx.recv().await.expect("event");
    assert!(!event.is_shape_change());
    assert_eq!(event.origin, Origin::User);
}
