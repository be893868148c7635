//! The workflow engine.
//!
//! A workflow executes its steps strictly sequentially: each step renders
//! its request template against the run's input data and the results of
//! prior steps, sends the request, and waits for the correlated response
//! before advancing. The wait is bounded by a caller-supplied timeout —
//! a step that never responds fails the workflow with the partial result
//! table intact. Cancellation stops issuing further steps but never
//! retracts a message already dispatched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use caduceus_contracts::audit::{AuditOutcome, AuditRecord};
use caduceus_contracts::error::{CaduceusError, CaduceusResult};
use caduceus_contracts::message::{CorrelationId, Message, MessageKind};
use caduceus_contracts::paths;
use caduceus_contracts::workflow::{WorkflowId, WorkflowOutcome, WorkflowStatus, WorkflowStep};

use crate::bus::Orchestrator;

/// Cooperative cancellation flag for one workflow run.
///
/// `cancel()` takes effect before the next step is issued; the in-flight
/// step, if any, still completes or times out (at-most-once step issuance,
/// no rollback).
#[derive(Clone, Default)]
pub struct WorkflowHandle {
    cancelled: Arc<AtomicBool>,
}

impl WorkflowHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Orchestrator {
    /// Execute `steps` in order with a fresh (non-cancellable) handle.
    pub async fn execute_workflow(
        &self,
        id: WorkflowId,
        steps: &[WorkflowStep],
        initial_data: Value,
        step_timeout: Duration,
    ) -> CaduceusResult<WorkflowOutcome> {
        self.execute_workflow_with(id, steps, initial_data, step_timeout, &WorkflowHandle::new())
            .await
    }

    /// Execute `steps` in order, observing `handle` for cancellation.
    ///
    /// Blocks only the calling task. The returned outcome carries the
    /// accumulated result table even on failure or cancellation; use
    /// [`WorkflowOutcome::is_complete`] or pattern-match the status.
    pub async fn execute_workflow_with(
        &self,
        id: WorkflowId,
        steps: &[WorkflowStep],
        initial_data: Value,
        step_timeout: Duration,
        handle: &WorkflowHandle,
    ) -> CaduceusResult<WorkflowOutcome> {
        // One correlation id per run: the single context owner. Steps are
        // sequential, so at most one waiter is ever outstanding on it.
        let correlation =
            CorrelationId::new(format!("wf-{}-{}", id.0, uuid::Uuid::new_v4().simple()));
        let origin = format!("workflow:{}", id.0);

        self.metrics()
            .incr("workflow_execution", &[("workflow", id.0.as_str())]);
        info!(workflow = %id, steps = steps.len(), "workflow started");

        let mut results: Map<String, Value> = Map::new();
        let mut status = WorkflowStatus::Completed;

        for (index, step) in steps.iter().enumerate() {
            if handle.is_cancelled() {
                info!(workflow = %id, completed = index, "workflow cancelled");
                status = WorkflowStatus::Cancelled {
                    completed_steps: index,
                };
                break;
            }

            let template_context = json!({
                "data": initial_data,
                "results": Value::Object(results.clone()),
            });
            let payload = render_template(&step.request, &template_context);

            debug!(workflow = %id, step = %step.name, agent = %step.agent, "issuing step");

            // Waiter first, then send — the response can never race past us.
            let waiter = self.register_waiter(&correlation);
            let request = Message::request(origin.clone(), step.agent.clone(), payload)
                .with_correlation(correlation.clone());

            let failure: Option<String> = match self.send(request) {
                Err(e) => Some(e.to_string()),
                Ok(()) => match tokio::time::timeout(step_timeout, waiter).await {
                    Ok(Ok(reply)) if reply.kind == MessageKind::Error => Some(
                        reply
                            .payload
                            .get("error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("handler error")
                            .to_string(),
                    ),
                    Ok(Ok(reply)) => {
                        results.insert(step.name.clone(), reply.payload);
                        None
                    }
                    Ok(Err(_)) => Some("response channel closed".to_string()),
                    Err(_) => {
                        self.clear_waiter(&correlation);
                        Some(
                            CaduceusError::Timeout {
                                operation: format!("workflow step '{}'", step.name),
                                millis: step_timeout.as_millis() as u64,
                            }
                            .to_string(),
                        )
                    }
                },
            };

            if let Some(reason) = failure {
                warn!(workflow = %id, step = %step.name, reason = %reason, "step failed");
                status = WorkflowStatus::Failed {
                    step: step.name.clone(),
                    reason,
                };
                break;
            }
        }

        self.clear_waiter(&correlation);
        self.discard_context(&correlation);

        let outcome_audit = match &status {
            WorkflowStatus::Completed => AuditOutcome::Allowed,
            WorkflowStatus::Failed { step, reason } => AuditOutcome::Error {
                detail: format!("step '{step}': {reason}"),
            },
            WorkflowStatus::Cancelled { completed_steps } => AuditOutcome::Error {
                detail: format!("cancelled after {completed_steps} step(s)"),
            },
        };
        self.audit().record(
            AuditRecord::new(origin, "workflow", id.0.clone(), outcome_audit)
                .with_detail(format!("{} of {} step(s) recorded", results.len(), steps.len())),
        );

        Ok(WorkflowOutcome {
            workflow_id: id,
            results,
            status,
        })
    }
}

// ── Template rendering ────────────────────────────────────────────────────────

/// Resolve `{{path}}` placeholders in a request template.
///
/// A string that is exactly one placeholder is replaced by the referenced
/// JSON value, preserving its type. Placeholders embedded in a longer
/// string interpolate the value's display form. Unresolved paths render
/// `null` (whole-string) or empty (embedded) and are logged.
pub fn render_template(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => render_string(s, context),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_template(v, context)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_template(v, context)).collect())
        }
        other => other.clone(),
    }
}

fn render_string(s: &str, context: &Value) -> Value {
    // Whole-string placeholder: type-preserving substitution.
    if let Some(inner) = s.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
        if !inner.contains('{') && !inner.contains('}') {
            let path = inner.trim();
            return match paths::resolve(context, path) {
                Some(value) => value.clone(),
                None => {
                    warn!(path = %path, "template placeholder unresolved");
                    Value::Null
                }
            };
        }
    }

    let placeholder = Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern");
    let rendered = placeholder.replace_all(s, |caps: &regex::Captures<'_>| {
        let path = &caps[1];
        match paths::resolve(context, path) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => {
                warn!(path = %path, "template placeholder unresolved");
                String::new()
            }
        }
    });
    Value::String(rendered.into_owned())
}

// ── Tests ────────────────────────────────────────────────────────────────────
