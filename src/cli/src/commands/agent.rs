//! Agent commands.
//!
//! Each write subcommand becomes one command handled by `AgentCommandHandler`;
//! `show` replays the agent from its history.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::sync::Arc;
use uuid::Uuid;

use strand_core::agents::{AgentStatus, TaskId};
use strand_core::commands::{
    AgentCommand, AgentCommandHandler, Command, CommandMetadata, CommandOutcome,
};
use strand_core::events::{AgentAggregate, AggregateId, EventStore};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Register a new agent
    Create {
        /// Agent name
        #[arg(short, long)]
        name: String,

        /// Capability tag (repeatable)
        #[arg(short = 'C', long = "capability")]
        capabilities: Vec<String>,

        /// Maximum concurrent tasks
        #[arg(long)]
        max_tasks: Option<u32>,

        /// Use this ID instead of generating one
        #[arg(long)]
        id: Option<Uuid>,

        #[command(flatten)]
        audit: Audit,
    },

    /// Hand a task to an idle agent
    Assign {
        /// Agent ID
        agent_id: Uuid,

        /// Task description
        #[arg(short, long)]
        description: String,

        /// Task ID (generated if omitted)
        #[arg(long)]
        task_id: Option<Uuid>,

        #[command(flatten)]
        audit: Audit,
    },

    /// Mark the agent's current task as completed
    Complete {
        /// Agent ID
        agent_id: Uuid,

        /// Task ID
        task_id: Uuid,

        /// Result as a JSON document
        #[arg(short, long, default_value = "null")]
        result: String,

        #[command(flatten)]
        audit: Audit,
    },

    /// Mark the agent's current task as failed
    Fail {
        /// Agent ID
        agent_id: Uuid,

        /// Task ID
        task_id: Uuid,

        /// Failure reason
        #[arg(short, long)]
        error: String,

        #[command(flatten)]
        audit: Audit,
    },

    /// Set an agent idle or offline
    Status {
        /// Agent ID
        agent_id: Uuid,

        /// Target status (idle, offline)
        status: String,

        #[arg(short, long)]
        reason: Option<String>,

        #[command(flatten)]
        audit: Audit,
    },

    /// Retire an agent
    Decommission {
        /// Agent ID
        agent_id: Uuid,

        #[arg(short, long)]
        reason: Option<String>,

        #[command(flatten)]
        audit: Audit,
    },

    /// Show an agent's current state
    Show {
        /// Agent ID
        agent_id: Uuid,
    },
}

/// Who is issuing the command, recorded in event metadata.
#[derive(clap::Args)]
pub struct Audit {
    /// Acting user
    #[arg(long, env = "STRAND_USER", default_value = "cli")]
    user: String,

    /// Correlation ID (generated if omitted)
    #[arg(long)]
    correlation_id: Option<String>,
}

impl Audit {
    fn metadata(self, aggregate_id: Option<Uuid>) -> CommandMetadata {
        let mut metadata = CommandMetadata::new(self.user);
        if let Some(id) = aggregate_id {
            metadata = metadata.for_aggregate(AggregateId::from(id));
        }
        if let Some(correlation_id) = self.correlation_id {
            metadata = metadata.with_correlation(correlation_id);
        }
        metadata
    }
}

pub async fn execute(
    cmd: AgentCommands,
    store: Arc<dyn EventStore>,
    format: OutputFormat,
) -> Result<()> {
    let handler = AgentCommandHandler::new(store);

    let command = match cmd {
        AgentCommands::Show { agent_id } => {
            return show(&handler, AggregateId::from(agent_id), format).await;
        }
        AgentCommands::Create {
            name,
            capabilities,
            max_tasks,
            id,
            audit,
        } => Command::new(
            AgentCommand::CreateAgent {
                name,
                capabilities,
                max_concurrent_tasks: max_tasks,
            },
            audit.metadata(id),
        ),
        AgentCommands::Assign {
            agent_id,
            description,
            task_id,
            audit,
        } => Command::new(
            AgentCommand::AssignTask {
                task_id: task_id.map(TaskId).unwrap_or_default(),
                description,
            },
            audit.metadata(Some(agent_id)),
        ),
        AgentCommands::Complete {
            agent_id,
            task_id,
            result,
            audit,
        } => Command::new(
            AgentCommand::CompleteTask {
                task_id: TaskId(task_id),
                result: serde_json::from_str(&result).context("--result is not valid JSON")?,
            },
            audit.metadata(Some(agent_id)),
        ),
        AgentCommands::Fail {
            agent_id,
            task_id,
            error,
            audit,
        } => Command::new(
            AgentCommand::FailTask {
                task_id: TaskId(task_id),
                error,
            },
            audit.metadata(Some(agent_id)),
        ),
        AgentCommands::Status {
            agent_id,
            status,
            reason,
            audit,
        } => Command::new(
            AgentCommand::ChangeStatus {
                status: status.parse::<AgentStatus>()?,
                reason,
            },
            audit.metadata(Some(agent_id)),
        ),
        AgentCommands::Decommission {
            agent_id,
            reason,
            audit,
        } => Command::new(
            AgentCommand::Decommission { reason },
            audit.metadata(Some(agent_id)),
        ),
    };

    let command_type = command.kind.command_type();
    let outcome = handler.handle(command).await?;
    print_outcome(command_type, &outcome, format)
}

fn print_outcome(command_type: &str, outcome: &CommandOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if outcome.events.is_empty() {
                output::print_info(&format!(
                    "{} changed nothing; agent {} stays at version {}",
                    command_type, outcome.aggregate_id, outcome.version
                ));
            } else {
                output::print_success(&format!(
                    "{} accepted; agent {} is now at version {}",
                    command_type, outcome.aggregate_id, outcome.version
                ));
                for event in &outcome.events {
                    output::print_detail(
                        &event.event_type,
                        &format!("version {}, position {}", event.version, event.position),
                    );
                }
            }
            Ok(())
        }
        _ => output::print_item(outcome, format),
    }
}

async fn show(
    handler: &AgentCommandHandler,
    agent_id: AggregateId,
    format: OutputFormat,
) -> Result<()> {
    let agent: AgentAggregate = handler.repository().load_existing(agent_id).await?;

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Agent: {}", agent.name));
            output::print_detail("ID", &agent_id.to_string());
            output::print_detail(
                "Status",
                agent.status.map_or("-", |s| s.as_str()),
            );
            output::print_detail("Version", &agent.version.to_string());
            output::print_detail("Capabilities", &agent.capabilities.join(", "));
            if let Some(max) = agent.max_concurrent_tasks {
                output::print_detail("Max Tasks", &max.to_string());
            }
            if let Some(task) = agent.current_task {
                output::print_detail("Current Task", &task.to_string());
            }
            output::print_detail("Completed", &agent.tasks_completed.to_string());
            output::print_detail("Failed", &agent.tasks_failed.to_string());
            if let Some(error) = &agent.last_error {
                output::print_detail("Last Error", error);
            }
            Ok(())
        }
        _ => output::print_item(&agent, format),
    }
}
