//! Event log reads: one aggregate's history, log tailing, last position.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use strand_core::events::{AggregateId, EventStore, StoredEvent};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct EventsArgs {
    /// Aggregate ID
    aggregate_id: Uuid,

    /// Only show events after this version
    #[arg(long)]
    from_version: Option<i64>,
}

#[derive(Args)]
pub struct TailArgs {
    /// Only show events after this position
    #[arg(long)]
    from_position: Option<i64>,

    /// Only show events of this type
    #[arg(short = 't', long = "type")]
    event_type: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct EventRow {
    #[tabled(rename = "Position")]
    position: i64,
    #[tabled(rename = "Aggregate")]
    aggregate: String,
    #[tabled(rename = "Version")]
    version: i64,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
}

impl From<&StoredEvent> for EventRow {
    fn from(e: &StoredEvent) -> Self {
        Self {
            position: e.position,
            aggregate: e.aggregate_id.to_string()[..8].to_string(),
            version: e.version,
            event_type: e.event_type.clone(),
            user: e.metadata.user_id.clone(),
            timestamp: e.metadata.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

fn print_events(events: &[StoredEvent], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<EventRow> = events.iter().map(EventRow::from).collect();
            output::print_list(&rows, format)
        }
        _ => output::print_item(&events, format),
    }
}

pub async fn history(args: EventsArgs, store: &dyn EventStore, format: OutputFormat) -> Result<()> {
    let events = store
        .get_events(AggregateId::from(args.aggregate_id), args.from_version)
        .await?;
    print_events(&events, format)
}

/// Print one page of the log; the last position shown is the next cursor.
pub async fn tail(args: TailArgs, store: &dyn EventStore, format: OutputFormat) -> Result<()> {
    let events = match &args.event_type {
        Some(event_type) => {
            store
                .get_events_by_type(event_type, args.from_position)
                .await?
        }
        None => store.get_all_events(args.from_position).await?,
    };
    print_events(&events, format)?;

    if let (OutputFormat::Table, Some(last)) = (format, events.last()) {
        output::print_info(&format!(
            "Continue with --from-position {}",
            last.position
        ));
    }
    Ok(())
}

pub async fn position(store: &dyn EventStore, format: OutputFormat) -> Result<()> {
    let position = store.get_last_position().await?;
    match format {
        OutputFormat::Table => output::print_detail("Last position", &position.to_string()),
        _ => output::print_item(&serde_json::json!({ "position": position }), format)?,
    }
    Ok(())
}
