use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_voice::call::{CallController, CallHandle, CallSettings, CallStatus, TranscriptEntry};
use loqa_voice::{create_router, transport, AppState, AudioBackendFactory, Config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "loqa-voice", version, about = "Live voice calls with a conversational engine")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/loqa-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP control API
    Serve,
    /// Run one interactive call in this terminal
    Call,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Loqa Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Engine: {:?} at {}", cfg.engine.transport, cfg.engine.url);

    let devices = Arc::new(AudioBackendFactory::from_config(&cfg.audio)?);
    let transport = transport::from_config(&cfg.engine);
    let call = CallController::spawn(CallSettings::from_config(&cfg), devices, transport);

    match cli.command {
        Command::Serve => serve(&cfg, call).await,
        Command::Call => interactive_call(call).await,
    }
}

async fn serve(cfg: &Config, call: CallHandle) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, create_router(AppState::new(call)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

async fn interactive_call(call: CallHandle) -> Result<()> {
    call.start_call().await?;
    println!("Calling... type 'm' + Enter to toggle mute, 'q' + Enter to hang up");

    let mut snapshots = call.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_status = CallStatus::Idle;
    let mut last_entry: Option<TranscriptEntry> = None;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();

                if snapshot.status != last_status {
                    println!("[{}]", snapshot.status);
                    last_status = snapshot.status.clone();
                }

                let seen = last_entry
                    .as_ref()
                    .and_then(|last| snapshot.transcript.iter().rposition(|e| e == last))
                    .map(|i| i + 1)
                    .unwrap_or(0);
                for entry in &snapshot.transcript[seen..] {
                    println!("{:?}: {}", entry.role, entry.text);
                }
                if let Some(entry) = snapshot.transcript.last() {
                    last_entry = Some(entry.clone());
                }

                if matches!(snapshot.status, CallStatus::Ended | CallStatus::Error { .. }) {
                    break;
                }
            }
            line = lines.next_line() => match line?.as_deref().map(str::trim) {
                Some("m") => {
                    let muted = call.toggle_mute().await?;
                    println!("{}", if muted { "Muted" } else { "Unmuted" });
                }
                Some("q") | None => {
                    call.hang_up().await?;
                    break;
                }
                Some(_) => {}
            }
        }
    }

    let stats = call.snapshot().stats;
    info!(
        "Call finished after {:.1}s: {} frames sent, {} chunks played, {} interruptions",
        stats.duration_secs, stats.frames_sent, stats.chunks_played, stats.interruptions
    );
    Ok(())
}
