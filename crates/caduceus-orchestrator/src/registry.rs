//! The agent registry.
//!
//! Read-heavy shared state behind a single `RwLock`: dispatch reads on
//! every message, writes happen on registration and after each handler
//! invocation. Descriptors are never deleted — an agent that goes away
//! transitions to `Offline` and keeps its history.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use caduceus_contracts::agent::{AgentDescriptor, AgentId, AgentRole, AgentStatus};

/// Key-indexed store of agent descriptors.
///
/// The narrow surface (register / lookup / status / outcome) allows a
/// later swap to persistent storage without touching call sites.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentDescriptor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace a registration. Idempotent by agent id.
    ///
    /// Returns `true` when an existing descriptor was replaced.
    pub fn register(&self, descriptor: AgentDescriptor) -> bool {
        let mut agents = self.agents.write().expect("registry lock poisoned");
        let replaced = agents
            .insert(descriptor.id.clone(), descriptor.clone())
            .is_some();
        info!(agent = %descriptor.id, role = %descriptor.role, replaced, "agent registered");
        replaced
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentDescriptor> {
        self.agents
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn role_of(&self, id: &AgentId) -> Option<AgentRole> {
        self.agents
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|d| d.role)
    }

    pub fn status_of(&self, id: &AgentId) -> Option<AgentStatus> {
        self.agents
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|d| d.status)
    }

    /// True when the agent exists and is not offline.
    pub fn is_dispatchable(&self, id: &AgentId) -> bool {
        matches!(
            self.status_of(id),
            Some(AgentStatus::Idle) | Some(AgentStatus::Processing) | Some(AgentStatus::Error)
        )
    }

    pub fn set_status(&self, id: &AgentId, status: AgentStatus) {
        if let Ok(mut agents) = self.agents.write() {
            if let Some(descriptor) = agents.get_mut(id) {
                descriptor.status = status;
            }
        }
    }

    /// Fold one handler outcome into the agent's rolling metrics and move
    /// it back to `Idle` (or `Error` on failure).
    pub fn record_outcome(&self, id: &AgentId, success: bool) {
        if let Ok(mut agents) = self.agents.write() {
            if let Some(descriptor) = agents.get_mut(id) {
                descriptor.metrics.record(success);
                descriptor.status = if success {
                    AgentStatus::Idle
                } else {
                    AgentStatus::Error
                };
            }
        }
    }

    /// Transition an agent to `Offline`. The descriptor remains.
    pub fn set_offline(&self, id: &AgentId) {
        self.set_status(id, AgentStatus::Offline);
    }

    pub fn all(&self) -> Vec<AgentDescriptor> {
        self.agents
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use caduceus_contracts::agent::{AgentDescriptor, AgentId, AgentRole, AgentStatus};

    use super::AgentRegistry;

    fn descriptor(id: &str) -> AgentDescriptor {
        AgentDescriptor::new(
            AgentId::new(id),
            AgentRole::Imaging,
            vec!["imaging:analyze".to_string()],
        )
    }

    #[test]
    fn register_is_idempotent_by_id() {
        let registry = AgentRegistry::new();
        assert!(!registry.register(descriptor("imaging-1")));
        assert!(registry.register(descriptor("imaging-1")), "second call replaces");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn re_registration_resets_metrics() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("imaging-1"));
        registry.record_outcome(&AgentId::new("imaging-1"), false);
        assert_eq!(
            registry.get(&AgentId::new("imaging-1")).unwrap().metrics.errors,
            1
        );

        registry.register(descriptor("imaging-1"));
        let fresh = registry.get(&AgentId::new("imaging-1")).unwrap();
        assert_eq!(fresh.metrics.errors, 0);
        assert_eq!(fresh.status, AgentStatus::Idle);
    }

    #[test]
    fn outcome_updates_status_and_metrics() {
        let registry = AgentRegistry::new();
        let id = AgentId::new("imaging-1");
        registry.register(descriptor("imaging-1"));

        registry.record_outcome(&id, true);
        registry.record_outcome(&id, false);

        let descriptor = registry.get(&id).unwrap();
        assert_eq!(descriptor.status, AgentStatus::Error);
        assert_eq!(descriptor.metrics.requests_handled, 2);
        assert_eq!(descriptor.metrics.errors, 1);
        assert!((descriptor.metrics.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn offline_agents_are_not_dispatchable_but_remain() {
        let registry = AgentRegistry::new();
        let id = AgentId::new("imaging-1");
        registry.register(descriptor("imaging-1"));
        assert!(registry.is_dispatchable(&id));

        registry.set_offline(&id);
        assert!(!registry.is_dispatchable(&id));
        assert!(registry.get(&id).is_some(), "descriptors are never deleted");
    }

    #[test]
    fn unknown_agent_is_not_dispatchable() {
        let registry = AgentRegistry::new();
        assert!(!registry.is_dispatchable(&AgentId::new("ghost")));
    }
}
