//! The agent handler trait.
//!
//! Handlers are the untrusted edge of the orchestrator: they may wrap an
//! LLM, an external tool, or arbitrary code. The dispatch worker catches
//! both returned errors and panics, so a handler can never take the loop
//! down — it can only fail its own message.

use async_trait::async_trait;
use serde_json::Value;

use caduceus_contracts::error::CaduceusResult;
use caduceus_contracts::message::Message;

/// One role's message-processing logic.
///
/// The orchestrator resolves the handler by the recipient agent's role and
/// invokes it with the message and, when the message carries a correlation
/// id, the shared context accumulated under that id.
///
/// Returning `Ok(value)` from a `Request` produces exactly one correlated
/// `Response` back to the original sender. `Event` messages produce no
/// response regardless of the return value.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(
        &self,
        message: Message,
        shared_context: Option<Value>,
    ) -> CaduceusResult<Value>;
}
