//! The message bus and dispatch loop.
//!
//! Architecture: one inbox feeds a single dispatch loop that fans out to
//! per-agent worker tasks. Each worker owns its agent's queue, so a single
//! recipient processes messages strictly in send order while different
//! recipients run concurrently. The loop and the workers survive every
//! per-message failure — unknown recipients, handler errors, and handler
//! panics are converted into audit events and metric updates, never into
//! a dead loop.
//!
//! Correlation ids tie requests to responses and to a shared context:
//! `send()` merges a correlated message's payload into the context keyed
//! by that id (last-writer-wins per sender), and a correlated `Response`
//! or `Error` first fulfills a registered waiter before falling back to
//! agent delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use caduceus_audit::{AuditSink, MetricsSink};
use caduceus_contracts::agent::{AgentDescriptor, AgentId, AgentRole, AgentStatus};
use caduceus_contracts::audit::{AuditOutcome, AuditRecord};
use caduceus_contracts::error::{CaduceusError, CaduceusResult};
use caduceus_contracts::message::{CorrelationId, Message, MessageKind};

use crate::handler::AgentHandler;
use crate::registry::AgentRegistry;

/// The coordination core: message bus + per-agent workers.
///
/// Cheap to clone (a handle around shared inner state). Construct with
/// [`Orchestrator::start`] from within a tokio runtime.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<AgentRegistry>,
    handlers: RwLock<HashMap<AgentRole, Arc<dyn AgentHandler>>>,
    inbox_tx: mpsc::UnboundedSender<Message>,
    /// Per-agent worker queues. Created at registration, kept for the
    /// process lifetime (descriptors are never deleted).
    queues: Mutex<HashMap<AgentId, mpsc::UnboundedSender<Message>>>,
    /// Shared workflow/request context per correlation id.
    contexts: Mutex<HashMap<CorrelationId, Map<String, Value>>>,
    /// At most one response waiter per correlation id — steps that share a
    /// correlation are strictly sequential.
    waiters: Mutex<HashMap<CorrelationId, oneshot::Sender<Message>>>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl Orchestrator {
    /// Spawn the background dispatch loop and return the handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        registry: Arc<AgentRegistry>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            registry,
            handlers: RwLock::new(HashMap::new()),
            inbox_tx,
            queues: Mutex::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            audit,
            metrics,
        });

        tokio::spawn(dispatch_loop(Arc::clone(&inner), inbox_rx));
        Self { inner }
    }

    /// Register the handler invoked for every agent of `role`.
    /// Registering the same role twice replaces the previous handler.
    pub fn register_handler(&self, role: AgentRole, handler: Arc<dyn AgentHandler>) {
        self.inner
            .handlers
            .write()
            .expect("handler table lock poisoned")
            .insert(role, handler);
    }

    /// Add or replace an agent's registration; idempotent by agent id.
    ///
    /// Spawns the agent's worker on first registration. Re-registering
    /// keeps the existing queue so in-flight messages are not dropped.
    pub fn register(&self, descriptor: AgentDescriptor) {
        let id = descriptor.id.clone();
        let role = descriptor.role;
        let replaced = self.inner.registry.register(descriptor);

        {
            let mut queues = self.inner.queues.lock().expect("queue table lock poisoned");
            if !queues.contains_key(&id) {
                let (tx, rx) = mpsc::unbounded_channel();
                queues.insert(id.clone(), tx);
                tokio::spawn(agent_worker(Arc::clone(&self.inner), id.clone(), rx));
            }
        }

        self.inner.audit.record(
            AuditRecord::new("orchestrator", "register-agent", id.0.clone(), AuditOutcome::Allowed)
                .with_detail(format!("role {role}, replaced: {replaced}")),
        );
    }

    /// Enqueue a message for dispatch.
    pub fn send(&self, message: Message) -> CaduceusResult<()> {
        self.inner.send(message)
    }

    /// Register a one-shot waiter for the next correlated `Response` or
    /// `Error`. Registering again for the same id replaces the previous
    /// waiter — callers that share a correlation id issue requests
    /// strictly one at a time.
    pub fn register_waiter(&self, correlation_id: &CorrelationId) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .inner
            .waiters
            .lock()
            .expect("waiter table lock poisoned")
            .insert(correlation_id.clone(), tx);
        if previous.is_some() {
            debug!(correlation = %correlation_id, "replaced existing response waiter");
        }
        rx
    }

    /// Drop any pending waiter for `correlation_id`.
    pub fn clear_waiter(&self, correlation_id: &CorrelationId) {
        self.inner
            .waiters
            .lock()
            .expect("waiter table lock poisoned")
            .remove(correlation_id);
    }

    /// The merged shared context for a correlation id, when any sender
    /// has contributed to it.
    pub fn shared_context(&self, correlation_id: &CorrelationId) -> Option<Value> {
        self.inner.shared_context(correlation_id)
    }

    /// Discard a correlation's shared context once its owner is done.
    pub fn discard_context(&self, correlation_id: &CorrelationId) {
        self.inner
            .contexts
            .lock()
            .expect("context table lock poisoned")
            .remove(correlation_id);
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    pub(crate) fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.inner.audit
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.inner.metrics
    }
}

impl Inner {
    fn send(&self, message: Message) -> CaduceusResult<()> {
        // Context merge: last-writer-wins per sender under the shared key.
        if let Some(correlation_id) = &message.correlation_id {
            let mut contexts = self.contexts.lock().expect("context table lock poisoned");
            let entry = contexts.entry(correlation_id.clone()).or_default();
            entry.insert(message.sender.clone(), message.payload.clone());
        }

        // A correlated reply fulfills its waiter instead of re-entering
        // dispatch; the originator is rarely a registered agent.
        if matches!(message.kind, MessageKind::Response | MessageKind::Error) {
            if let Some(correlation_id) = message.correlation_id.clone() {
                let waiter = self
                    .waiters
                    .lock()
                    .expect("waiter table lock poisoned")
                    .remove(&correlation_id);
                if let Some(tx) = waiter {
                    if tx.send(message).is_err() {
                        debug!(correlation = %correlation_id, "waiter gone before delivery");
                    }
                    return Ok(());
                }
            }
        }

        self.inbox_tx
            .send(message)
            .map_err(|_| CaduceusError::Config {
                reason: "orchestrator dispatch loop is not running".to_string(),
            })
    }

    fn shared_context(&self, correlation_id: &CorrelationId) -> Option<Value> {
        self.contexts
            .lock()
            .expect("context table lock poisoned")
            .get(correlation_id)
            .map(|map| Value::Object(map.clone()))
    }

    /// Record an unreachable recipient: audit + metric, and an `Error`
    /// reply when a correlated request would otherwise wait out its
    /// timeout. Never propagates — the loop continues.
    fn note_unavailable(&self, recipient: &AgentId, message: &Message) {
        let error = CaduceusError::AgentUnavailable {
            agent: recipient.0.clone(),
        };
        warn!(agent = %recipient, message = %message.id.0, "recipient unavailable");

        self.audit.record(
            AuditRecord::new(
                "orchestrator",
                "dispatch",
                recipient.0.clone(),
                AuditOutcome::Error {
                    detail: error.to_string(),
                },
            )
            .with_detail(format!("message {}", message.id.0)),
        );
        self.metrics
            .incr("agent_error", &[("agent", recipient.0.as_str())]);

        if message.kind == MessageKind::Request && message.correlation_id.is_some() {
            let _ = self.send(Message::error_to(message, recipient, error.to_string()));
        }
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

/// Pops the oldest message and fans it out to per-agent queues.
///
/// A failure for one recipient never affects the others and never stops
/// the loop.
async fn dispatch_loop(inner: Arc<Inner>, mut inbox_rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = inbox_rx.recv().await {
        for recipient in message.recipients.clone() {
            if !inner.registry.is_dispatchable(&recipient) {
                inner.note_unavailable(&recipient, &message);
                continue;
            }

            let queue = inner
                .queues
                .lock()
                .expect("queue table lock poisoned")
                .get(&recipient)
                .cloned();

            match queue {
                Some(tx) if tx.send(message.clone()).is_ok() => {}
                _ => inner.note_unavailable(&recipient, &message),
            }
        }
    }
    debug!("dispatch loop stopped: all senders dropped");
}

/// One agent's worker: processes that agent's messages strictly in order.
///
/// Handler errors and panics are caught here; they mark the agent `Error`,
/// update its rolling metrics, and emit audit + metrics — the worker keeps
/// running.
async fn agent_worker(
    inner: Arc<Inner>,
    agent_id: AgentId,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        // Status may have changed between dispatch and here.
        if !inner.registry.is_dispatchable(&agent_id) {
            inner.note_unavailable(&agent_id, &message);
            continue;
        }

        let Some(role) = inner.registry.role_of(&agent_id) else {
            continue;
        };
        let handler = inner
            .handlers
            .read()
            .expect("handler table lock poisoned")
            .get(&role)
            .cloned();
        let Some(handler) = handler else {
            fail_message(
                &inner,
                &agent_id,
                &message,
                CaduceusError::HandlerFailure {
                    agent: agent_id.0.clone(),
                    reason: format!("no handler registered for role {role}"),
                },
            );
            continue;
        };

        inner.registry.set_status(&agent_id, AgentStatus::Processing);
        let shared = message
            .correlation_id
            .as_ref()
            .and_then(|c| inner.shared_context(c));

        // Run the handler on its own task so a panic becomes a JoinError
        // instead of killing this worker.
        let invocation = tokio::spawn({
            let handler = Arc::clone(&handler);
            let message = message.clone();
            async move { handler.handle(message, shared).await }
        });

        let outcome = match invocation.await {
            Ok(result) => result,
            Err(join_error) => Err(CaduceusError::HandlerFailure {
                agent: agent_id.0.clone(),
                reason: format!("handler panicked: {join_error}"),
            }),
        };

        match outcome {
            Ok(value) => {
                inner.registry.record_outcome(&agent_id, true);
                inner.audit.record(
                    AuditRecord::new(
                        agent_id.0.clone(),
                        "handle-message",
                        message.id.0.to_string(),
                        AuditOutcome::Allowed,
                    )
                    .with_detail(format!("kind {:?}", message.kind)),
                );

                // A handled request produces exactly one correlated response.
                if message.kind == MessageKind::Request {
                    let response = Message::response_to(&message, &agent_id, value);
                    if let Err(e) = inner.send(response) {
                        warn!(agent = %agent_id, error = %e, "response could not be enqueued");
                    }
                }
            }
            Err(error) => fail_message(&inner, &agent_id, &message, error),
        }
    }
}

/// Shared failure path: metrics, audit, agent state, and a correlated
/// `Error` reply for requests so waiters fail fast.
fn fail_message(inner: &Arc<Inner>, agent_id: &AgentId, message: &Message, error: CaduceusError) {
    warn!(agent = %agent_id, message = %message.id.0, error = %error, "handler failed");

    inner.registry.record_outcome(agent_id, false);
    inner
        .metrics
        .incr("agent_error", &[("agent", agent_id.0.as_str())]);
    inner.audit.record(
        AuditRecord::new(
            agent_id.0.clone(),
            "handle-message",
            message.id.0.to_string(),
            AuditOutcome::Error {
                detail: error.to_string(),
            },
        ),
    );

    if message.kind == MessageKind::Request && message.correlation_id.is_some() {
        let _ = inner.send(Message::error_to(message, agent_id, error.to_string()));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use caduceus_audit::{AuditSink, BufferedAuditSink, ChainedAuditLog, InMemoryMetrics};
    use caduceus_contracts::agent::{AgentDescriptor, AgentId, AgentRole, AgentStatus};
    use caduceus_contracts::error::{CaduceusError, CaduceusResult};
    use caduceus_contracts::message::{CorrelationId, Message, MessageKind};

    use crate::handler::AgentHandler;
    use crate::registry::AgentRegistry;

    use super::Orchestrator;

    // ── Test handlers ─────────────────────────────────────────────────────────

    /// Echoes the request payload back, recording every payload seen.
    struct EchoHandler {
        seen: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl AgentHandler for EchoHandler {
        async fn handle(
            &self,
            message: Message,
            _shared_context: Option<Value>,
        ) -> CaduceusResult<Value> {
            self.seen.lock().unwrap().push(message.payload.clone());
            Ok(json!({ "echo": message.payload }))
        }
    }

    /// Fails every message.
    struct FailingHandler;

    #[async_trait]
    impl AgentHandler for FailingHandler {
        async fn handle(&self, message: Message, _ctx: Option<Value>) -> CaduceusResult<Value> {
            Err(CaduceusError::HandlerFailure {
                agent: message.recipients[0].0.clone(),
                reason: "synthetic failure".to_string(),
            })
        }
    }

    /// Panics on a poisoned payload, echoes otherwise.
    struct PanickyHandler;

    #[async_trait]
    impl AgentHandler for PanickyHandler {
        async fn handle(&self, message: Message, _ctx: Option<Value>) -> CaduceusResult<Value> {
            if message.payload.get("poison").is_some() {
                panic!("poisoned payload");
            }
            Ok(json!({ "ok": true }))
        }
    }

    fn harness() -> (Orchestrator, Arc<ChainedAuditLog>, Arc<InMemoryMetrics>) {
        let log = Arc::new(ChainedAuditLog::new());
        let sink = Arc::new(BufferedAuditSink::new(Arc::clone(&log), 1));
        let metrics = Arc::new(InMemoryMetrics::new());
        let orchestrator = Orchestrator::start(
            Arc::new(AgentRegistry::new()),
            sink as Arc<dyn AuditSink>,
            Arc::clone(&metrics) as _,
        );
        (orchestrator, log, metrics)
    }

    fn imaging_agent(id: &str) -> AgentDescriptor {
        AgentDescriptor::new(AgentId::new(id), AgentRole::Imaging, vec![])
    }

    async fn eventually<F: Fn() -> bool>(check: F, what: &str) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true: {what}");
    }

    // ── Test cases ────────────────────────────────────────────────────────────

    /// Registering an agent, sending it a correlated request, and having
    /// its handler return produces exactly one response to the original
    /// sender carrying the same correlation id.
    #[tokio::test]
    async fn test_request_response_correlation() {
        let (orchestrator, _log, _metrics) = harness();
        orchestrator.register_handler(
            AgentRole::Imaging,
            Arc::new(EchoHandler {
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
        );
        orchestrator.register(imaging_agent("imaging-1"));

        let correlation = CorrelationId::new("corr-x");
        let waiter = orchestrator.register_waiter(&correlation);

        let request = Message::request("platform", AgentId::new("imaging-1"), json!({ "n": 1 }))
            .with_correlation(correlation.clone());
        orchestrator.send(request).unwrap();

        let response = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("response must arrive")
            .expect("waiter channel must deliver");

        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.correlation_id, Some(correlation));
        assert_eq!(response.sender, "imaging-1");
        assert_eq!(response.recipients, vec![AgentId::new("platform")]);
        assert_eq!(response.payload, json!({ "echo": { "n": 1 } }));
    }

    /// Messages to one recipient are handled strictly in send order.
    #[tokio::test]
    async fn test_fifo_per_recipient() {
        let (orchestrator, _log, _metrics) = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        orchestrator.register_handler(
            AgentRole::Imaging,
            Arc::new(EchoHandler { seen: Arc::clone(&seen) }),
        );
        orchestrator.register(imaging_agent("imaging-1"));

        for n in 0..5 {
            let event = Message::event(
                "platform",
                vec![AgentId::new("imaging-1")],
                json!({ "seq": n }),
            );
            orchestrator.send(event).unwrap();
        }

        eventually(|| seen.lock().unwrap().len() == 5, "five events handled").await;
        let order: Vec<i64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|p| p["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    /// An unknown recipient is recorded and never crashes the loop; later
    /// messages still dispatch.
    #[tokio::test]
    async fn test_unknown_recipient_survives() {
        let (orchestrator, _log, metrics) = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        orchestrator.register_handler(
            AgentRole::Imaging,
            Arc::new(EchoHandler { seen: Arc::clone(&seen) }),
        );
        orchestrator.register(imaging_agent("imaging-1"));

        let ghost = Message::event("platform", vec![AgentId::new("ghost")], json!({}));
        orchestrator.send(ghost).unwrap();

        let real = Message::event("platform", vec![AgentId::new("imaging-1")], json!({}));
        orchestrator.send(real).unwrap();

        eventually(|| seen.lock().unwrap().len() == 1, "real message handled").await;
        assert_eq!(metrics.count("agent_error", &[("agent", "ghost")]), 1);
    }

    /// A handler failure marks the agent `Error`, updates its metrics, and
    /// delivers a correlated `Error` reply to the waiter.
    #[tokio::test]
    async fn test_handler_failure_updates_agent_and_waiter() {
        let (orchestrator, _log, metrics) = harness();
        orchestrator.register_handler(AgentRole::Imaging, Arc::new(FailingHandler));
        orchestrator.register(imaging_agent("imaging-1"));

        let correlation = CorrelationId::new("corr-fail");
        let waiter = orchestrator.register_waiter(&correlation);
        let request = Message::request("platform", AgentId::new("imaging-1"), json!({}))
            .with_correlation(correlation);
        orchestrator.send(request).unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("error reply must arrive")
            .unwrap();
        assert_eq!(reply.kind, MessageKind::Error);

        let descriptor = orchestrator
            .registry()
            .get(&AgentId::new("imaging-1"))
            .unwrap();
        assert_eq!(descriptor.status, AgentStatus::Error);
        assert_eq!(descriptor.metrics.errors, 1);
        assert_eq!(metrics.count("agent_error", &[("agent", "imaging-1")]), 1);
    }

    /// A panicking handler is contained: the worker keeps serving the
    /// agent afterwards.
    #[tokio::test]
    async fn test_handler_panic_contained() {
        let (orchestrator, _log, _metrics) = harness();
        orchestrator.register_handler(AgentRole::Imaging, Arc::new(PanickyHandler));
        orchestrator.register(imaging_agent("imaging-1"));

        let poison = CorrelationId::new("corr-poison");
        let poison_waiter = orchestrator.register_waiter(&poison);
        orchestrator
            .send(
                Message::request("platform", AgentId::new("imaging-1"), json!({ "poison": 1 }))
                    .with_correlation(poison.clone()),
            )
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), poison_waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, MessageKind::Error);

        // The same agent still processes the next message.
        let fine = CorrelationId::new("corr-fine");
        let fine_waiter = orchestrator.register_waiter(&fine);
        orchestrator
            .send(
                Message::request("platform", AgentId::new("imaging-1"), json!({}))
                    .with_correlation(fine.clone()),
            )
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), fine_waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, MessageKind::Response);
    }

    /// Context merging is last-writer-wins per sender.
    #[tokio::test]
    async fn test_context_merge_per_sender() {
        let (orchestrator, _log, _metrics) = harness();
        orchestrator.register_handler(
            AgentRole::Imaging,
            Arc::new(EchoHandler {
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
        );
        orchestrator.register(imaging_agent("imaging-1"));

        let correlation = CorrelationId::new("corr-ctx");
        for (sender, payload) in [
            ("alpha", json!({ "v": 1 })),
            ("beta", json!({ "v": 2 })),
            ("alpha", json!({ "v": 3 })),
        ] {
            let event = Message::event(sender, vec![AgentId::new("imaging-1")], payload)
                .with_correlation(correlation.clone());
            orchestrator.send(event).unwrap();
        }

        let context = orchestrator.shared_context(&correlation).unwrap();
        assert_eq!(context["alpha"], json!({ "v": 3 }), "alpha's later write wins");
        assert_eq!(context["beta"], json!({ "v": 2 }));
    }

    /// Offline agents are unavailable without losing their descriptor.
    #[tokio::test]
    async fn test_offline_agent_unavailable() {
        let (orchestrator, _log, metrics) = harness();
        orchestrator.register_handler(
            AgentRole::Imaging,
            Arc::new(EchoHandler {
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
        );
        orchestrator.register(imaging_agent("imaging-1"));
        orchestrator.registry().set_offline(&AgentId::new("imaging-1"));

        let correlation = CorrelationId::new("corr-offline");
        let waiter = orchestrator.register_waiter(&correlation);
        orchestrator
            .send(
                Message::request("platform", AgentId::new("imaging-1"), json!({}))
                    .with_correlation(correlation),
            )
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(metrics.count("agent_error", &[("agent", "imaging-1")]), 1);
    }
}
