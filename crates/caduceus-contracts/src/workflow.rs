//! Workflow definition and outcome types.
//!
//! A workflow is a named, ordered list of steps, each addressing one agent
//! with a request template. Execution state (`WorkflowContext`) lives in the
//! orchestrator and is exclusively owned by a single run; these types are
//! the caller-visible surface.

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::error::{CaduceusError, CaduceusResult};

/// Identifier for a workflow definition / run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of a workflow: a request template addressed to one agent.
///
/// The template is arbitrary JSON; string values may contain `{{path}}`
/// placeholders resolved against the run's input data (`data.*`) and prior
/// step results (`results.<step-name>.*`) at issue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name; keys the step's result in the outcome table.
    pub name: String,
    /// The agent this step's request is addressed to.
    pub agent: AgentId,
    /// Request payload template with `{{path}}` placeholders.
    pub request: serde_json::Value,
}

/// Terminal status of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum WorkflowStatus {
    /// Every step completed and recorded a result.
    Completed,
    /// A step failed or timed out; remaining steps were not issued.
    Failed { step: String, reason: String },
    /// The run was cancelled; `completed_steps` were issued before the
    /// cancellation was observed. Dispatched messages are never retracted.
    Cancelled { completed_steps: usize },
}

/// What a workflow run produced.
///
/// `results` is the accumulated result table keyed by step name. On
/// failure or cancellation it holds the partial results of the steps that
/// did complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub workflow_id: WorkflowId,
    pub results: serde_json::Map<String, serde_json::Value>,
    pub status: WorkflowStatus,
}

impl WorkflowOutcome {
    /// True only for a fully completed run.
    pub fn is_complete(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    /// Collapse the outcome into a hard error for callers with no use for
    /// partial results. A cancelled run is not a failure — the caller
    /// asked for it — so it yields whatever completed.
    pub fn into_result(self) -> CaduceusResult<serde_json::Map<String, serde_json::Value>> {
        match self.status {
            WorkflowStatus::Completed | WorkflowStatus::Cancelled { .. } => Ok(self.results),
            WorkflowStatus::Failed { step, reason } => Err(CaduceusError::WorkflowFailed {
                workflow: self.workflow_id.0,
                step,
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CaduceusError;

    use super::{WorkflowId, WorkflowOutcome, WorkflowStatus};

    #[test]
    fn into_result_surfaces_failure_and_passes_completion() {
        let completed = WorkflowOutcome {
            workflow_id: WorkflowId::new("ok"),
            results: serde_json::Map::new(),
            status: WorkflowStatus::Completed,
        };
        assert!(completed.into_result().is_ok());

        let failed = WorkflowOutcome {
            workflow_id: WorkflowId::new("bad"),
            results: serde_json::Map::new(),
            status: WorkflowStatus::Failed {
                step: "assess".to_string(),
                reason: "timed out".to_string(),
            },
        };
        match failed.into_result() {
            Err(CaduceusError::WorkflowFailed { workflow, step, .. }) => {
                assert_eq!(workflow, "bad");
                assert_eq!(step, "assess");
            }
            other => panic!("expected WorkflowFailed, got {other:?}"),
        }
    }
}
