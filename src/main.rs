use anyhow::Context;
use chrono::Utc;
use copilot::kernel::sweeper::EvictionSweeper;
use copilot::services::Collaborators;
use copilot::{ConversationId, Copilot, CopilotConfig, Utterance};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// Console transport: stdin lines are one conversation, replies go to stdout.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = CopilotConfig::from_env().context("loading configuration")?;
    let collaborators = Collaborators::campus_defaults(&config);
    let copilot = Copilot::new(&config, collaborators).context("building pipeline")?;
    tracing::info!(timezone = %copilot.tz(), "campus copilot booting");

    let shutdown = CancellationToken::new();
    let sweeper = EvictionSweeper::new(copilot.store().clone(), config.idle_timeout(), config.sweep_interval())
        .with_telemetry(copilot.telemetry())
        .spawn(shutdown.clone());

    let conversation = ConversationId::new("console");
    let sender = std::env::var("USER").unwrap_or_else(|_| "student".to_string());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("ready. Type a request, Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if line.trim() == "/reset" {
                    copilot.reset(&conversation);
                    println!("(session reset)");
                    continue;
                }
                let utterance = Utterance::new(conversation.clone(), sender.as_str(), line, Utc::now());
                let report = copilot.respond(&utterance).await;
                println!("{}", report.reply.text);
            }
        }
    }

    shutdown.cancel();
    sweeper.await.context("joining sweeper")?;

    let snap = copilot.telemetry_snapshot();
    tracing::info!(
        turns = snap.turn_stats.total,
        dispatched = snap.turn_stats.dispatched,
        clarified = snap.turn_stats.clarified,
        unhandled = snap.turn_stats.unhandled,
        "session summary"
    );
    Ok(())
}
