use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tunebot_core::eventbus::EventBus;
use tunebot_core::eventbus::event_logger::spawn_event_logger_task;
use tunebot_core::models::Volume;
use tunebot_core::platforms::{Catalog, CatalogResolver, LoopbackTransport};
use tunebot_core::services::spawn_transport_event_task;
use tunebot_core::tasks::idle_sweep::spawn_idle_sweep_task;
use tunebot_core::{BotConfig, PlaybackController, SessionStore};

mod console;

#[derive(Parser, Debug, Clone)]
#[command(name = "tunebot")]
#[command(author, version, about = "TuneBot - per-chat music playback sessions")]
struct Args {
    /// JSON file with the track catalogue (array of {title, artist, duration_secs, source_uri})
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Evict Idle sessions after this many seconds (overrides IDLE_TIMEOUT_SECS)
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Starting volume of new sessions, 0-200 (overrides DEFAULT_VOLUME)
    #[arg(long)]
    default_volume: Option<i64>,

    /// Loopback playback speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("tunebot=info".parse().unwrap_or_default())
        .add_directive("tunebot_core=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {}", e);
    }
}

fn load_config(args: &Args) -> anyhow::Result<BotConfig> {
    let mut config = BotConfig::from_env().context("reading configuration")?;
    if let Some(secs) = args.idle_timeout_secs {
        config.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(level) = args.default_volume {
        config.default_volume = Volume::new(level).context("--default-volume")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;
    info!("TuneBot starting. config={:?}", config);

    // 1) Catalogue + resolver
    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path).with_context(|| format!("loading catalog {:?}", path))?,
        None => {
            warn!("No --catalog given; using the built-in demo catalogue.");
            Catalog::demo()
        }
    };
    let resolver = Arc::new(CatalogResolver::new(catalog.clone()));

    // 2) Transport and its event channel
    let (transport_tx, transport_rx) = mpsc::channel(1024);
    let transport = Arc::new(LoopbackTransport::new(catalog, transport_tx).with_speed(args.speed));

    // 3) Core
    let event_bus = Arc::new(EventBus::new());
    let store = Arc::new(SessionStore::from_config(&config));
    let controller = Arc::new(PlaybackController::new(
        store.clone(),
        resolver,
        transport.clone(),
        event_bus.clone(),
        config.clone(),
    ));

    // 4) Background tasks
    let logger_handle = spawn_event_logger_task(&event_bus, 1024).await;
    let transport_handle = spawn_transport_event_task(controller.clone(), transport_rx, &event_bus);
    let sweep_handle = spawn_idle_sweep_task(
        store.clone(),
        event_bus.clone(),
        config.sweep_interval,
        config.idle_timeout,
    );

    // 5) Console loop; ctrl-c or "quit" ends it
    println!("TuneBot ready. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received => shutting down.");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let (quit, output) = console::dispatch(&line, &controller, &transport).await;
                        if let Some(text) = output {
                            println!("{}", text);
                        }
                        if quit {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {:?}", e);
                        break;
                    }
                }
            }
        }
    }

    // 6) Shutdown: stop every session so each stream is detached, then drain tasks.
    for chat_id in store.chat_ids() {
        if let Err(e) = controller.stop(chat_id).await {
            warn!("Stopping chat {} during shutdown failed: {:?}", chat_id, e);
        }
    }
    event_bus.shutdown();
    let _ = sweep_handle.await;
    match transport_handle.await {
        Ok(n) => info!("Transport event task handled {} events.", n),
        Err(e) => error!("Transport event task failed: {:?}", e),
    }
    match logger_handle.await {
        Ok(n) => info!("Event logger wrote {} events.", n),
        Err(e) => error!("Event logger failed: {:?}", e),
    }
    info!("TuneBot stopped.");
    Ok(())
}
