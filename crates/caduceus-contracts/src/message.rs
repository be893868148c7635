//! Message types for the orchestrator's bus.
//!
//! A `Message` is immutable once created and owned by the orchestrator's
//! queue for its lifetime. The optional correlation id ties a request to
//! its eventual response and to a shared workflow context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// Unique identifier for a single message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared key linking a request, its response, and any workflow context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discriminant for what a message means to its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Asks a recipient to do work. A handler result produces a `Response`.
    Request,
    /// Carries a handler result back to the original sender.
    Response,
    /// One-way notification; no response is produced.
    Event,
    /// Carries a failure description back to the original sender.
    Error,
}

/// Message priority. Metadata for consumers and audit; the bus itself
/// processes each recipient's messages strictly in send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A single message on the bus.
///
/// `sender` is a free-form origin label — an agent id, or a boundary
/// origin such as `"platform"` or `"workflow:tumor-board"`. Recipients
/// are always registered agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub recipients: Vec<AgentId>,
    pub kind: MessageKind,
    /// Opaque payload. The bus never inspects this beyond context merging.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<CorrelationId>,
    pub priority: Priority,
}

impl Message {
    /// Build a `Request` to a single recipient with default priority.
    pub fn request(
        sender: impl Into<String>,
        recipient: AgentId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender: sender.into(),
            recipients: vec![recipient],
            kind: MessageKind::Request,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            priority: Priority::default(),
        }
    }

    /// Build an `Event` fanned out to many recipients.
    pub fn event(
        sender: impl Into<String>,
        recipients: Vec<AgentId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender: sender.into(),
            recipients,
            kind: MessageKind::Event,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            priority: Priority::default(),
        }
    }

    /// Build the `Response` to `request`, addressed back to its sender.
    ///
    /// The response inherits the request's correlation id, which is how a
    /// waiting caller matches it. Response messages are created only after
    /// the request's handler has returned. The original sender label becomes
    /// the sole recipient; the bus delivers to a correlation waiter first
    /// and only falls back to agent delivery when the sender is a
    /// registered agent.
    pub fn response_to(request: &Message, responder: &AgentId, payload: serde_json::Value) -> Self {
        Self {
            id: MessageId::new(),
            sender: responder.0.clone(),
            recipients: vec![AgentId(request.sender.clone())],
            kind: MessageKind::Response,
            payload,
            timestamp: Utc::now(),
            correlation_id: request.correlation_id.clone(),
            priority: request.priority,
        }
    }

    /// Build the `Error` reply to `request` when its handler failed.
    ///
    /// Routed exactly like a `Response` — a workflow waiting on the
    /// correlation id receives it and fails the step with the reason
    /// instead of waiting out its timeout.
    pub fn error_to(request: &Message, responder: &AgentId, reason: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: responder.0.clone(),
            recipients: vec![AgentId(request.sender.clone())],
            kind: MessageKind::Error,
            payload: serde_json::json!({ "error": reason.into() }),
            timestamp: Utc::now(),
            correlation_id: request.correlation_id.clone(),
            priority: request.priority,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Override the default priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
