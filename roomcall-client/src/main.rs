mod cli;
mod config;

use crate::cli::Cli;
use crate::config::AppConfig;
use anyhow::Context;
use clap::Parser;
use roomcall_signaling::{ActiveSession, MemoryStore, Phase, SessionEvent, SessionManager};
use roomcall_webrtc::{FramePipeline, MediaKind, RtcEngine};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=info,roomcall_signaling=info,roomcall_webrtc=info",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::parse().context("Failed to parse config")?;
    if let Some(connect_timeout) = cli.connect_timeout {
        config.call.connect_timeout_secs = connect_timeout;
    }
    let kind = if cli.audio {
        MediaKind::Audio
    } else {
        MediaKind::Video
    };
    let room_id = cli
        .room
        .unwrap_or_else(|| format!("room-{}", uuid::Uuid::new_v4()));

    // both participants share one in-process relay
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(store, config.session.clone());

    tracing::info!(?room_id, ?kind, "Joining room with two participants");
    let offerer = join(&manager, &room_id, kind)
        .await
        .context("First participant failed to join")?;
    let answerer = match join(&manager, &room_id, kind).await {
        Ok(session) => session,
        Err(err) => {
            manager.release(offerer).await;
            return Err(err.context("Second participant failed to join"));
        }
    };

    let outcome = tokio::select! {
        result = async {
            tokio::try_join!(wait_connected(&offerer), wait_connected(&answerer)).map(|_| ())
        } => result,
        _ = tokio::time::sleep(config.call.connect_timeout()) => {
            Err(anyhow::anyhow!(
                "Participants did not connect within {}s",
                config.call.connect_timeout_secs
            ))
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, releasing sessions");
            Ok(())
        }
    };

    if outcome.is_ok() {
        tracing::info!("Participants connected");
    }

    for session in [offerer, answerer] {
        let role = session.role();
        let report = manager.release(session).await;
        println!("{role}: released {:?}", report.steps);
    }

    outcome
}

async fn join(
    manager: &SessionManager<MemoryStore>,
    room_id: &str,
    kind: MediaKind,
) -> anyhow::Result<ActiveSession> {
    let engine = RtcEngine::new(manager.config().ice.clone());
    let media = FramePipeline::new(kind);
    Ok(manager.acquire(room_id, engine, media).await?)
}

async fn wait_connected(session: &ActiveSession) -> anyhow::Result<()> {
    let mut phase = session.subscribe_phase();
    let mut events = session.subscribe();

    loop {
        if *phase.borrow_and_update() == Phase::Connected {
            return Ok(());
        }

        tokio::select! {
            changed = phase.changed() => {
                changed.context("Session worker stopped")?;
                tracing::info!(role = %session.role(), phase = ?*phase.borrow(), "Phase changed");
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Stalled(err)) => {
                    anyhow::bail!("{} negotiation stalled: {err}", session.role());
                }
                Ok(event) => tracing::debug!(role = %session.role(), ?event, "Session event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(?skipped, "Missed session events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("{} session closed", session.role());
                }
            },
        }
    }
}
