use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use voicemail_session::services::{
    MemoryNotifier, MemoryStore, Notifier, PlaybackMode, SimulatedPlayer,
};
use voicemail_session::{create_router, AppState, Config, NatsNotifier, PromptSet, SessionServices};

#[derive(Parser)]
#[command(name = "voicemail-session")]
#[command(about = "Voicemail reader and writer sessions over simulated calls")]
struct Args {
    /// Config file path, without extension
    #[arg(short, long, default_value = "config/voicemail")]
    config: String,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voicemail_session=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!(
        "Recording format: {} (max {}s, beep={})",
        cfg.recording.format, cfg.recording.max_duration_secs, cfg.recording.beep
    );

    let storage = Arc::new(MemoryStore::with_default_folders());
    for folder in MemoryStore::default_folders() {
        info!("Folder {} ({}) on key {}", folder.name, folder.id, folder.selector);
    }

    let notifier: Arc<dyn Notifier> = match &cfg.nats {
        Some(nats) => match NatsNotifier::connect(&nats.url, nats.subject_prefix.clone()).await {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                warn!("NATS unavailable, keeping notifications in memory: {:#}", e);
                Arc::new(MemoryNotifier::new())
            }
        },
        None => Arc::new(MemoryNotifier::new()),
    };

    let services = SessionServices {
        storage,
        player: Arc::new(SimulatedPlayer::new(PlaybackMode::Timed(Duration::from_millis(
            250,
        )))),
        notifier,
        prompts: Arc::new(PromptSet::with_overrides(&cfg.prompts)),
    };

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let app = create_router(AppState::new(services, cfg));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
