//! Agenda watcher
//!
//! Connects as the configured viewer and reprints the ranked appointment
//! list whenever the local set changes.
//!
//! Usage: `agenda_sync [status-filter] [urgency-filter]`, e.g.
//! `agenda_sync pendente urgente`. Both default to `todos`.

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agenda_sync::domain::{classify, days_until};
use agenda_sync::events::AgendaEvent;
use agenda_sync::{AgendaConfig, AgendaSession, ViewFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agenda_sync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let status = args.next().unwrap_or_else(|| "todos".to_string());
    let urgency = args.next().unwrap_or_else(|| "todos".to_string());
    let view_filter = ViewFilter::parse(&status, &urgency).context("Invalid filter arguments")?;

    let config = AgendaConfig::from_env().context("Failed to load configuration")?;
    info!("Watching agenda of {} at {}", config.viewer.id, config.api_url);

    let session = AgendaSession::builder(config)
        .start()
        .await
        .context("Failed to start agenda session")?;
    let mut events = session.subscribe_events();

    print_view(&session, &view_filter).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(AgendaEvent::RecordsReplaced { .. }) | Ok(AgendaEvent::PatchApplied { .. }) => {
                    print_view(&session, &view_filter).await;
                }
                Ok(AgendaEvent::Connection(state)) => info!("Live channel: {:?}", state),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} session events", skipped);
                    print_view(&session, &view_filter).await;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn print_view(session: &AgendaSession, filter: &ViewFilter) {
    let today = session.today();
    let records = session.view(filter).await;

    println!("\n{}", "═".repeat(60));
    println!("📅 {} appointment(s) as of {}", records.len(), today);
    println!("{}", "═".repeat(60));
    for r in &records {
        let time = r.time.map(|t| t.format("%H:%M").to_string()).unwrap_or_else(|| "--:--".into());
        let value = r.value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
        println!(
            "{:<10} {} {}  {:<8} ({:+}d)  {:<22} {:>10}{}",
            r.service_id,
            r.date,
            time,
            classify(r.date, today).label(),
            days_until(r.date, today),
            r.status.as_wire(),
            value,
            if r.rated { "  ★" } else { "" }
        );
    }
}
