//! Agent commands and the rules that turn them into events.
//!
//! [`decide`] is pure: it looks only at the rehydrated aggregate and the
//! command, so every rule here is testable without a store.

use serde::{Deserialize, Serialize};

use crate::agents::{AgentStatus, TaskId};
use crate::error::{Result, StrandError};
use crate::events::{
    AgentAggregate, AgentCreated, AgentDecommissioned, AgentStatusChanged, DomainEvent,
    TaskAssigned, TaskCompleted, TaskFailed, AGENT_AGGREGATE_TYPE,
};

/// Commands accepted by the Agent aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentCommand {
    CreateAgent {
        name: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        max_concurrent_tasks: Option<u32>,
    },
    AssignTask {
        task_id: TaskId,
        description: String,
    },
    CompleteTask {
        task_id: TaskId,
        #[serde(default)]
        result: serde_json::Value,
    },
    FailTask {
        task_id: TaskId,
        error: String,
    },
    ChangeStatus {
        status: AgentStatus,
        #[serde(default)]
        reason: Option<String>,
    },
    Decommission {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl AgentCommand {
    pub fn command_type(&self) -> &'static str {
        match self {
            AgentCommand::CreateAgent { .. } => "CreateAgent",
            AgentCommand::AssignTask { .. } => "AssignTask",
            AgentCommand::CompleteTask { .. } => "CompleteTask",
            AgentCommand::FailTask { .. } => "FailTask",
            AgentCommand::ChangeStatus { .. } => "ChangeStatus",
            AgentCommand::Decommission { .. } => "Decommission",
        }
    }

    /// Whether this command may target an aggregate with no history.
    pub fn is_creation(&self) -> bool {
        matches!(self, AgentCommand::CreateAgent { .. })
    }
}

/// Validate `command` against `agent` and produce the events it implies.
///
/// An empty result means the command is accepted but changes nothing.
pub fn decide(agent: &AgentAggregate, command: &AgentCommand) -> Result<Vec<DomainEvent>> {
    match command {
        AgentCommand::CreateAgent {
            name,
            capabilities,
            max_concurrent_tasks,
        } => {
            if agent.exists() {
                return Err(StrandError::aggregate_already_exists(
                    AGENT_AGGREGATE_TYPE,
                    display_id(agent),
                ));
            }
            if name.trim().is_empty() {
                return Err(StrandError::validation("Agent name must not be empty"));
            }
            if *max_concurrent_tasks == Some(0) {
                return Err(StrandError::validation(
                    "max_concurrent_tasks must be at least 1",
                ));
            }
            Ok(vec![DomainEvent::AgentCreated(AgentCreated {
                name: name.trim().to_string(),
                capabilities: capabilities.clone(),
                max_concurrent_tasks: *max_concurrent_tasks,
            })])
        }

        AgentCommand::AssignTask {
            task_id,
            description,
        } => {
            let status = existing_status(agent)?;
            if status != AgentStatus::Idle {
                return Err(StrandError::invalid_state(format!(
                    "Cannot assign a task to an agent in status {}",
                    status
                )));
            }
            if description.trim().is_empty() {
                return Err(StrandError::validation("Task description must not be empty"));
            }
            Ok(vec![DomainEvent::TaskAssigned(TaskAssigned {
                task_id: *task_id,
                description: description.clone(),
            })])
        }

        AgentCommand::CompleteTask { task_id, result } => {
            existing_status(agent)?;
            ensure_current_task(agent, *task_id)?;
            Ok(vec![DomainEvent::TaskCompleted(TaskCompleted {
                task_id: *task_id,
                result: result.clone(),
            })])
        }

        AgentCommand::FailTask { task_id, error } => {
            existing_status(agent)?;
            ensure_current_task(agent, *task_id)?;
            if error.trim().is_empty() {
                return Err(StrandError::validation("Failure reason must not be empty"));
            }
            Ok(vec![DomainEvent::TaskFailed(TaskFailed {
                task_id: *task_id,
                error: error.clone(),
            })])
        }

        AgentCommand::ChangeStatus {
            status: target,
            reason,
        } => {
            let status = existing_status(agent)?;
            match target {
                AgentStatus::Decommissioned => {
                    return Err(StrandError::validation(
                        "Use Decommission to retire an agent",
                    ))
                }
                AgentStatus::Busy => {
                    return Err(StrandError::validation(
                        "Busy is set by task assignment, not directly",
                    ))
                }
                AgentStatus::Idle | AgentStatus::Offline => {}
            }
            if status.is_terminal() {
                return Err(StrandError::invalid_state(
                    "Agent is decommissioned",
                ));
            }
            if agent.current_task.is_some() {
                return Err(StrandError::invalid_state(
                    "Cannot change status while a task is in flight",
                ));
            }
            if status == *target {
                return Ok(Vec::new());
            }
            Ok(vec![DomainEvent::AgentStatusChanged(AgentStatusChanged {
                from: status,
                to: *target,
                reason: reason.clone(),
            })])
        }

        AgentCommand::Decommission { reason } => {
            let status = existing_status(agent)?;
            if status.is_terminal() {
                return Err(StrandError::invalid_state(
                    "Agent is already decommissioned",
                ));
            }
            if agent.current_task.is_some() {
                return Err(StrandError::invalid_state(
                    "Cannot decommission an agent with a task in flight",
                ));
            }
            Ok(vec![DomainEvent::AgentDecommissioned(AgentDecommissioned {
                reason: reason.clone(),
            })])
        }
    }
}

/// Status of a created agent; every command but creation needs one.
fn existing_status(agent: &AgentAggregate) -> Result<AgentStatus> {
    agent.status.ok_or_else(|| {
        StrandError::aggregate_not_found(AGENT_AGGREGATE_TYPE, display_id(agent))
    })
}

fn ensure_current_task(agent: &AgentAggregate, task_id: TaskId) -> Result<()> {
    match agent.current_task {
        Some(current) if current == task_id => Ok(()),
        Some(current) => Err(StrandError::invalid_state(format!(
            "Task {} is not the agent's current task ({})",
            task_id, current
        ))),
        None => Err(StrandError::invalid_state(format!(
            "Agent has no task in flight; cannot settle task {}",
            task_id
        ))),
    }
}

fn display_id(agent: &AgentAggregate) -> String {
    agent
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<unassigned>".to_string())
}
