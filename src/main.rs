//! Answer Stream Server
//!
//! Entry point for the streaming answer service and its `ask` command.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use answer_stream::AppState;
use answer_stream::config::{AppConfig, Command, LogFormat};
use answer_stream::conversation::{TurnReducer, TurnUpdate};
use answer_stream::normalized::CanonicalEvent;
use answer_stream::server::start_server;
use answer_stream::upstream::start_turn;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let (config, command) = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(config.log.format);

    let config = Arc::new(config);
    match command {
        Command::Serve => start_server(config).await,
        Command::Ask { question } => ask(config, &question).await,
    }
}

/// Initialize tracing (M-LOG-STRUCTURED).
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
    }
}

/// Run one question and print the answer as it is revealed.
async fn ask(config: Arc<AppConfig>, question: &str) -> anyhow::Result<()> {
    let state = AppState::from_config(Arc::clone(&config)).context("Failed to build upstream")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut run = start_turn(
        state.upstream.as_ref(),
        TurnReducer::new(question),
        config.pacing.reveal_delay(),
        cancel,
    )
    .await;

    let mut out = std::io::stdout().lock();
    let mut streamed = false;
    while let Some(update) = run.next().await {
        match update {
            TurnUpdate::Applied { event, .. } => match event {
                CanonicalEvent::SearchWeb { queries } => {
                    for q in queries {
                        writeln!(out, "» searching: {}", q.query)?;
                    }
                }
                CanonicalEvent::UrlCrawlUpdate { url } => writeln!(out, "» reading: {url}")?,
                CanonicalEvent::ThoughtProcessUpdate => writeln!(out)?,
                CanonicalEvent::TextChunk { text } => {
                    streamed = true;
                    write!(out, "{text}")?;
                }
                CanonicalEvent::FinalAnswer { text } if !streamed => write!(out, "{text}")?,
                CanonicalEvent::Citations { sources } => {
                    writeln!(out, "\n\nSources:")?;
                    for (i, s) in sources.iter().enumerate() {
                        writeln!(out, "  [{}] {} - {}", i + 1, s.title, s.url)?;
                    }
                }
                _ => {}
            },
            TurnUpdate::Failed { reason } => {
                tracing::error!(name: "ask.failed", error = %reason, "Turn failed");
                writeln!(out, "\n{}", run.state().accumulated_text)?;
            }
        }
        out.flush()?;
    }
    writeln!(out)?;

    if run.is_cancelled() {
        anyhow::bail!("Cancelled");
    }
    Ok(())
}
