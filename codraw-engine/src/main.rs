//! # codraw
//!
//! One-shot co-drawing from the command line: load a canvas, ask the AI for
//! help with a prompt, optionally accept the staged drawing, and write the
//! canvas back out.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use codraw_engine::engine::new_store;
use codraw_engine::{Engine, EngineConfig, GenerationOutcome, GenerationRequest};
use codraw_renderer::{to_data_uri, ImageFormat};

/// Command-line arguments for codraw.
#[derive(Debug, Clone, Parser)]
#[command(name = "codraw")]
#[command(about = "Ask the AI collaborator to draw on a canvas document")]
#[command(version)]
struct CliArgs {
    /// What to ask for
    #[arg(long, short)]
    prompt: String,

    /// Canvas JSON to start from (blank canvas if omitted)
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Where to write the resulting canvas JSON
    #[arg(long, short)]
    output: PathBuf,

    /// Reference image files sent along with the prompt
    #[arg(long = "reference", short)]
    references: Vec<PathBuf>,

    /// Accept the staged drawing instead of leaving it pending
    #[arg(long)]
    accept: bool,

    /// Provider base URL
    #[arg(long, env = "CODRAW_PROVIDER_URL")]
    provider_url: Option<String>,

    /// Provider API key
    #[arg(long, env = "CODRAW_PROVIDER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Hard limit on the remote call in seconds (0 disables)
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl CliArgs {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(url) = &self.provider_url {
            config.provider.base_url.clone_from(url);
        }
        if let Some(key) = &self.api_key {
            config.provider.api_key = Some(key.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config.solver.generation_timeout_ms = (secs > 0).then(|| secs.saturating_mul(1000));
        }
        // A one-shot run never waits for the debouncer.
        config.solver.auto_enabled = false;
    }

    fn reference_images(&self) -> anyhow::Result<Vec<String>> {
        self.references
            .iter()
            .map(|path| {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading reference image {}", path.display()))?;
                Ok(to_data_uri(ImageFormat::from_magic_bytes(&bytes).mime(), &bytes))
            })
            .collect()
    }
}

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels (default: info,codraw_engine=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,codraw_engine=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = CliArgs::parse();

    let mut config = EngineConfig::from_env()?;
    args.apply(&mut config);

    let store = new_store(&config);
    if let Some(input) = &args.input {
        store
            .load_from_path(input)
            .with_context(|| format!("loading canvas {}", input.display()))?;
        tracing::info!(path = %input.display(), shapes = store.shape_count(), "Canvas loaded");
    }

    let engine = Engine::from_config(store, config)?;
    let request = GenerationRequest::chat(args.prompt.clone())
        .with_reference_images(args.reference_images()?);

    match engine.solver().generate(request).await? {
        GenerationOutcome::Staged {
            shape_id, message, ..
        } => {
            if let Some(message) = message {
                println!("{message}");
            }
            if args.accept {
                engine.solver().handle_accept(shape_id);
            }
            tracing::info!(%shape_id, accepted = args.accept, "Drawing staged");
        }
        GenerationOutcome::Responded { message } => println!("{message}"),
        GenerationOutcome::Cancelled => tracing::warn!("Generation was cancelled"),
    }

    if let Some(sync) = engine.persistence() {
        if let Err(e) = sync.flush().await {
            tracing::warn!(error = %e, "Final save failed");
        }
    }

    engine
        .store()
        .save_to_path(&args.output)
        .with_context(|| format!("writing canvas {}", args.output.display()))?;
    tracing::info!(path = %args.output.display(), "Canvas written");
    Ok(())
}
