//! Headless widget host with remote-control channels.
//!
//! Serve with: cargo run -p fiend-daemon -- serve --config appsettings.json
//!
//! Then drive it with: cargo run -p fiend-daemon -- send setboth --base a.png --face x.png

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fiend_comms::ChannelManager;
use fiend_core::{AppSettings, CommandRequest, DEFAULT_PIPE_NAME, TargetController};
use fiend_sprites::{SpriteLibrary, spawn_rotation};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fiend-daemon", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Host the widget state and open the configured channels.
    Serve {
        /// Settings file in appsettings.json shape.
        #[arg(long, env = "FIEND_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Send one command over the local-stream channel and print the reply.
    Send {
        /// Command name (random, setbase, setface, setboth, status, list).
        command: String,

        /// Base image file name.
        #[arg(long)]
        base: Option<String>,

        /// Face image file name.
        #[arg(long)]
        face: Option<String>,

        /// Local-stream endpoint name.
        #[arg(long, default_value = DEFAULT_PIPE_NAME)]
        pipe: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match Cli::parse().command {
        Commands::Serve { config } => serve(config).await,
        Commands::Send {
            command,
            base,
            face,
            pipe,
        } => send(&pipe, command, base, face).await,
    }
}

async fn serve(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = match config {
        Some(path) => AppSettings::load(&path)?,
        None => AppSettings::default(),
    };

    let library = Arc::new(SpriteLibrary::new(&settings.fiend_friend.sprite_path));
    tracing::info!(sprites = %library.root().display(), "Using sprite directory");
    if let Err(e) = library.load_random().await {
        tracing::warn!("Initial image load failed: {e}");
    }
    let controller: Arc<dyn TargetController> = library;

    let mut manager = ChannelManager::new(Arc::clone(&controller));
    let started = manager.initialize(&settings.communication).await;
    for channel in manager.status() {
        tracing::info!(channel = %channel.name, active = channel.is_active, "Channel status");
    }
    if started == 0 {
        tracing::warn!("No communication channels are running");
    }

    let rotation_cancel = CancellationToken::new();
    let rotation = settings
        .fiend_friend
        .rotation_interval()
        .map(|interval| spawn_rotation(Arc::clone(&controller), interval, rotation_cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    rotation_cancel.cancel();
    if let Some(handle) = rotation {
        let _ = handle.await;
    }
    manager.stop_all().await;
    manager.dispose();
    Ok(())
}

async fn send(
    pipe: &str,
    command: String,
    base: Option<String>,
    face: Option<String>,
) -> anyhow::Result<()> {
    let mut request = CommandRequest::new(command);
    if let Some(base) = base {
        request = request.base_image(base);
    }
    if let Some(face) = face {
        request = request.face_image(face);
    }

    let response = fiend_transport::send_request(pipe, &request)
        .await
        .with_context(|| format!("Request to {pipe} failed"))?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.success {
        anyhow::bail!(
            "{}",
            response.message.as_deref().unwrap_or("Request failed")
        );
    }
    Ok(())
}
