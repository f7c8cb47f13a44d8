//! Auto mode and persistence wired through [`Engine`].

mod common;

use std::sync::Arc;
use std::time::Duration;

use codraw_engine::engine::new_store;
use codraw_engine::{Connectivity, Engine, EngineConfig, RequestSource, SolverPhase};
use codraw_renderer::SvgRasterizer;

use common::{eventually, user_rect, FakeDocumentStore, FakeProvider};

fn config() -> EngineConfig {
    EngineConfig {
        settle_delay_ms: 0,
        ..EngineConfig::default()
    }
}

fn engine(provider: &Arc<FakeProvider>) -> Engine {
    engine_over(new_store(&config()), provider)
}

fn engine_over(store: codraw_core::CanvasStore, provider: &Arc<FakeProvider>) -> Engine {
    Engine::start(
        store,
        Arc::clone(provider) as _,
        Arc::new(SvgRasterizer::new()),
        config(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_user_activity_triggers_auto_generation() {
    let provider = FakeProvider::new();
    let engine = engine(&provider);

    engine.store().create_shape(user_rect(0.0)).expect("create");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(provider.requests().is_empty());

    assert!(eventually(|| provider.requests().len() == 1).await);
    assert_eq!(provider.requests()[0].source, RequestSource::Auto);
    assert!(
        eventually(|| engine.solver().status().status_message.as_deref() == Some("Nice drawing"))
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_engine_writes_do_not_trigger_auto() {
    let provider = FakeProvider::new();
    let engine = engine(&provider);

    {
        let _scope = engine.store().latch().acquire();
        engine.store().create_shape(user_rect(0.0)).expect("create");
    }
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(provider.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_auto_disabled_skips_provider() {
    let provider = FakeProvider::new();
    let engine = engine(&provider);
    engine.solver().set_auto_enabled(false);

    engine.store().create_shape(user_rect(0.0)).expect("create");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(provider.requests().is_empty());
    assert_eq!(engine.solver().status().phase, SolverPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_saves_after_edits() {
    let provider = FakeProvider::new();
    provider.push(common::Scripted::reply(codraw_engine::CoDrawResponse::Respond {
        message: "ok".into(),
    }));
    let documents = FakeDocumentStore::new();
    let engine = engine(&provider).with_persistence(
        Arc::clone(&documents) as _,
        Arc::new(SvgRasterizer::new()),
        "board-7",
        Connectivity::default(),
    );

    engine.store().create_shape(user_rect(0.0)).expect("create");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(eventually(|| documents.save_count() >= 1).await);
    assert_eq!(documents.saves()[0].0, "board-7");

    engine
        .persistence()
        .expect("attached")
        .flush()
        .await
        .expect("flush");
}

#[tokio::test]
async fn test_scene_file_round_trip_keeps_accepted_drawing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.json");
    let output = dir.path().join("output.json");

    let seed = new_store(&config());
    seed.create_shape(user_rect(0.0)).expect("create");
    seed.save_to_path(&input).expect("save seed");

    let provider = FakeProvider::new();
    provider.push(common::Scripted::reply(common::draw_with_image(
        common::red_square_png(16, 16),
        Some("Sketch"),
    )));
    let store = new_store(&config());
    store.load_from_path(&input).expect("load");
    let engine = engine_over(store, &provider);

    let outcome = engine
        .solver()
        .generate(codraw_engine::GenerationRequest::chat("add a sun"))
        .await
        .expect("generate");
    assert!(outcome.is_success());
    assert!(engine.solver().accept_current().is_some());
    engine.store().save_to_path(&output).expect("write");

    let reloaded = new_store(&config());
    reloaded.load_from_path(&output).expect("reload");
    assert_eq!(reloaded.shape_count(), 2);
    assert!(reloaded.shapes().iter().all(|s| !s.is_pending()));
    assert!(reloaded.layers().iter().any(|l| l.name == "Sketch"));
}
