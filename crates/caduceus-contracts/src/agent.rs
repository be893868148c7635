//! Agent identity, role, and health-tracking types.
//!
//! An agent is a specialized message handler bound to a role. The registry
//! owns one `AgentDescriptor` per agent; only the orchestrator mutates it
//! during dispatch, and descriptors are never deleted during a process
//! lifetime (an agent may transition to `Offline` instead).

use serde::{Deserialize, Serialize};

/// Stable, human-readable identifier for an agent.
///
/// Used across messages, policy rules, audit records, and metrics tags.
/// Example: AgentId("imaging-agent-1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Construct an agent id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed set of processing specialties an agent can be bound to.
///
/// The orchestrator resolves the handler for a message by the recipient
/// agent's role, so every role maps to exactly one handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    /// Patient intake and admission processing.
    Intake,
    /// Radiology / imaging study analysis.
    Imaging,
    /// Oncology case review.
    Oncology,
    /// Medication and interaction checks.
    Pharmacy,
    /// Appointment and resource scheduling.
    Scheduling,
    /// Health-record retrieval and summarization.
    Records,
    /// Aggregate reporting over de-identified data.
    Analytics,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRole::Intake => "intake",
            AgentRole::Imaging => "imaging",
            AgentRole::Oncology => "oncology",
            AgentRole::Pharmacy => "pharmacy",
            AgentRole::Scheduling => "scheduling",
            AgentRole::Records => "records",
            AgentRole::Analytics => "analytics",
        };
        f.write_str(s)
    }
}

/// Current lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    /// Registered and ready to accept work.
    Idle,
    /// Currently executing a handler. The dispatch loop never runs two
    /// handlers concurrently for the same agent.
    Processing,
    /// The last handler invocation failed. Cleared on the next success.
    Error,
    /// Deregistered from dispatch. Descriptors are never deleted, so this
    /// is the terminal "gone" state.
    Offline,
}

/// Rolling health metrics for a single agent.
///
/// Updated only by the dispatch worker that owns the agent, after each
/// handler invocation. `success_rate` is a running average over all
/// handled requests, starting at 1.0 for an agent that has done no work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Total handler invocations, successful or not.
    pub requests_handled: u64,
    /// Total failed handler invocations.
    pub errors: u64,
    /// Running average of successful invocations in [0.0, 1.0].
    pub success_rate: f64,
}

impl AgentMetrics {
    /// Fold one handler outcome into the running metrics.
    ///
    /// The success rate is a true running average: after `n` requests of
    /// which `s` succeeded, `success_rate == s / n`.
    pub fn record(&mut self, success: bool) {
        let prior = self.success_rate * self.requests_handled as f64;
        self.requests_handled += 1;
        if !success {
            self.errors += 1;
        }
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (prior + outcome) / self.requests_handled as f64;
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            requests_handled: 0,
            errors: 0,
            success_rate: 1.0,
        }
    }
}

/// Everything the registry knows about one agent.
///
/// Created at registration. `status` and `metrics` are mutated only by the
/// orchestrator's dispatch workers; `capabilities` are fixed at
/// registration (re-registering with the same id replaces the descriptor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub role: AgentRole,
    /// Declared capability strings, e.g. "phi:read", "imaging:analyze".
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub metrics: AgentMetrics,
}

impl AgentDescriptor {
    /// Build a descriptor for a freshly registered agent: idle, no work done.
    pub fn new(id: AgentId, role: AgentRole, capabilities: Vec<String>) -> Self {
        Self {
            id,
            role,
            capabilities,
            status: AgentStatus::Idle,
            metrics: AgentMetrics::default(),
        }
    }
}
