//! The caller-facing platform boundary.
//!
//! Every operation here runs the same trust order the dispatch core does:
//! policy first, then security transformations, then the orchestrator.
//! No operation touches data before `evaluate_access` clears it, and a
//! denial surfaces as `CaduceusError::AccessDenied` naming the violated
//! rules — the full violation records are already in the store by then.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use caduceus_audit::MetricsSink;
use caduceus_contracts::compliance::{Actor, ViolationId};
use caduceus_contracts::classification::TransformationKind;
use caduceus_contracts::error::{CaduceusError, CaduceusResult};
use caduceus_contracts::message::Message;
use caduceus_contracts::workflow::{WorkflowId, WorkflowOutcome, WorkflowStep};
use caduceus_orchestrator::{Orchestrator, WorkflowHandle};
use caduceus_policy::PolicyEngine;
use caduceus_security::{FieldTransform, Processed, ProcessingConfig, SecurityProcessor};

use crate::external::{HealthRecordConnector, KnowledgeQuery, QueryAnswer};
use crate::report::ComplianceReport;

/// The platform boundary used by outer layers (CLI, web handlers).
pub struct Platform {
    orchestrator: Orchestrator,
    policy: Arc<PolicyEngine>,
    security: Arc<SecurityProcessor>,
    records: Arc<dyn HealthRecordConnector>,
    knowledge: Arc<dyn KnowledgeQuery>,
    metrics: Arc<dyn MetricsSink>,
}

impl Platform {
    pub fn new(
        orchestrator: Orchestrator,
        policy: Arc<PolicyEngine>,
        security: Arc<SecurityProcessor>,
        records: Arc<dyn HealthRecordConnector>,
        knowledge: Arc<dyn KnowledgeQuery>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            orchestrator,
            policy,
            security,
            records,
            knowledge,
            metrics,
        }
    }

    /// The underlying orchestrator, for agent and handler wiring.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn security(&self) -> &Arc<SecurityProcessor> {
        &self.security
    }

    // ── The gate ──────────────────────────────────────────────────────────────

    /// Evaluate access and convert a denial into `AccessDenied`.
    ///
    /// The policy engine has already stored the violations and audited the
    /// decision by the time this returns.
    fn authorize(
        &self,
        actor: &Actor,
        resource: &str,
        action: &str,
        context: Value,
    ) -> CaduceusResult<()> {
        let decision = self.policy.evaluate_access(actor, resource, action, &context);
        if decision.allowed {
            return Ok(());
        }

        let rule_ids: Vec<String> = decision
            .violations
            .iter()
            .map(|v| v.rule_id.clone())
            .collect();
        warn!(actor = %actor.id, action, resource, rules = ?rule_ids, "operation denied");

        Err(CaduceusError::AccessDenied {
            action: action.to_string(),
            reason: format!(
                "{} rule requirement(s) unmet; required: {}",
                decision.violations.len(),
                decision.required_actions.join(", "),
            ),
            rule_ids,
        })
    }

    /// Map policy-required transformation kinds onto the payload's fields.
    ///
    /// A handling rule matches on the payload-level classification (the
    /// most sensitive field tag), so its transformations target exactly
    /// the fields carrying that tag — a PHI encrypt rule must not override
    /// the tokenize default on a PII field riding in the same payload.
    /// Fields the caller already covers are skipped, and when several
    /// kinds are required the first applies per field — the directives
    /// carry no field targeting, and stacking transforms on one field
    /// would destroy the first one's output.
    fn policy_transforms(
        &self,
        required: &[TransformationKind],
        data: &Value,
        already_covered: &[FieldTransform],
    ) -> Vec<FieldTransform> {
        let Some(kind) = required.first().copied() else {
            return Vec::new();
        };
        if required.len() > 1 {
            debug!(?required, "multiple required transformations; applying the first per field");
        }

        let field_tags = self.security.classifier().classify_fields(data);
        let payload_tag = caduceus_contracts::classification::DataClassification::most_sensitive(
            field_tags.values().copied(),
        );
        if !payload_tag.is_sensitive() {
            return Vec::new();
        }

        field_tags
            .into_iter()
            .filter(|(field, tag)| {
                *tag == payload_tag && !already_covered.iter().any(|t| &t.field == field)
            })
            .map(|(field, _)| FieldTransform {
                field,
                kind,
                strategy: None,
            })
            .collect()
    }

    /// Evaluate data handling and reject a non-compliant operation.
    fn required_transforms(
        &self,
        actor: &Actor,
        operation: &str,
        data: &Value,
    ) -> CaduceusResult<Vec<TransformationKind>> {
        let handling =
            self.policy
                .evaluate_data_handling(operation, data, &json!({ "actor": actor }));
        if !handling.compliant {
            let rule_ids: Vec<String> = handling
                .violations
                .iter()
                .map(|v| v.rule_id.clone())
                .collect();
            return Err(CaduceusError::AccessDenied {
                action: operation.to_string(),
                reason: format!("{} handling requirement(s) unmet", handling.violations.len()),
                rule_ids,
            });
        }
        Ok(handling.required_transformations)
    }

    // ── Caller-facing operations ──────────────────────────────────────────────

    /// Execute a workflow on behalf of `actor`.
    ///
    /// The input data passes through policy-required and
    /// classification-default transformations before the first step is
    /// issued — no PHI reaches an agent untransformed.
    pub async fn execute_workflow(
        &self,
        actor: &Actor,
        id: WorkflowId,
        steps: &[WorkflowStep],
        data: Value,
        step_timeout: Duration,
    ) -> CaduceusResult<WorkflowOutcome> {
        self.execute_workflow_with(actor, id, steps, data, step_timeout, &WorkflowHandle::new())
            .await
    }

    /// `execute_workflow` with a caller-held cancellation handle.
    pub async fn execute_workflow_with(
        &self,
        actor: &Actor,
        id: WorkflowId,
        steps: &[WorkflowStep],
        data: Value,
        step_timeout: Duration,
        handle: &WorkflowHandle,
    ) -> CaduceusResult<WorkflowOutcome> {
        self.authorize(
            actor,
            &id.0,
            "execute-workflow",
            json!({ "data": data.clone(), "actor": actor }),
        )?;

        let required = self.required_transforms(actor, "execute-workflow", &data)?;
        let config = ProcessingConfig {
            operation: "workflow-input".to_string(),
            transformations: self.policy_transforms(&required, &data, &[]),
            ..ProcessingConfig::default()
        };
        let processed = self.security.process(&actor.id, &data, &config)?;

        self.orchestrator
            .execute_workflow_with(id, steps, processed.data, step_timeout, handle)
            .await
    }

    /// Query the knowledge service. Emits the `rag_query` metric.
    pub async fn query(
        &self,
        actor: &Actor,
        text: &str,
        filters: &Value,
    ) -> CaduceusResult<QueryAnswer> {
        self.authorize(actor, "knowledge-base", "knowledge-query", json!({ "actor": actor }))?;
        self.metrics
            .incr("rag_query", &[("actor", actor.id.as_str())]);
        self.knowledge.query(text, filters).await
    }

    /// Run data through the security pipeline with policy-required
    /// transformations merged into the caller's config.
    pub fn process_data(
        &self,
        actor: &Actor,
        data: &Value,
        config: &ProcessingConfig,
    ) -> CaduceusResult<Processed> {
        self.authorize(
            actor,
            "payload",
            "process-data",
            json!({ "data": data.clone(), "actor": actor }),
        )?;

        let required = self.required_transforms(actor, &config.operation, data)?;
        let mut merged = config.clone();
        merged
            .transformations
            .extend(self.policy_transforms(&required, data, &config.transformations));

        self.security.process(&actor.id, data, &merged)
    }

    /// Fetch a patient summary and protect it before it leaves the
    /// boundary. The connector's output is PHI by contract.
    pub async fn get_patient_data(
        &self,
        actor: &Actor,
        patient_id: &str,
    ) -> CaduceusResult<Processed> {
        let resource = format!("patient/{patient_id}");
        self.authorize(
            actor,
            &resource,
            "read",
            json!({ "classification": "phi", "actor": actor }),
        )?;

        let summary = self.records.get_patient_summary(patient_id).await?;
        let data = serde_json::to_value(&summary).map_err(|e| CaduceusError::Validation {
            reason: format!("patient summary is not serializable: {e}"),
        })?;

        let config = ProcessingConfig {
            operation: "get-patient-data".to_string(),
            classification: Some(caduceus_contracts::classification::DataClassification::Phi),
            ..ProcessingConfig::default()
        };
        self.security.process(&actor.id, &data, &config)
    }

    /// Send a message into the bus on behalf of `actor`.
    pub fn send_agent_message(&self, actor: &Actor, message: Message) -> CaduceusResult<()> {
        let recipients = message
            .recipients
            .iter()
            .map(|r| r.0.as_str())
            .collect::<Vec<_>>()
            .join(",");
        self.authorize(
            actor,
            &recipients,
            "send-message",
            json!({ "data": message.payload.clone(), "actor": actor }),
        )?;
        self.orchestrator.send(message)
    }

    /// Roll up the violation store into a report.
    pub fn generate_compliance_report(&self, actor: &Actor) -> CaduceusResult<ComplianceReport> {
        self.authorize(actor, "compliance-reports", "generate-report", json!({ "actor": actor }))?;
        Ok(ComplianceReport::build(
            &self.policy.violations(),
            self.policy.policies(),
        ))
    }

    /// Rotate field encryption keys (all known fields when `None`).
    pub fn rotate_encryption_keys(
        &self,
        actor: &Actor,
        fields: Option<&[String]>,
    ) -> CaduceusResult<Vec<String>> {
        self.authorize(actor, "keyring", "rotate-keys", json!({ "actor": actor }))?;
        Ok(self.security.rotate_keys(&actor.id, fields))
    }

    /// Close a violation with a remediation note (operator action).
    pub fn resolve_violation(
        &self,
        actor: &Actor,
        id: &ViolationId,
        remediation: &str,
    ) -> CaduceusResult<()> {
        self.authorize(actor, "violations", "resolve-violation", json!({ "actor": actor }))?;
        self.policy.violations().resolve(id, remediation)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use caduceus_audit::{
        AuditSink, BufferedAuditSink, ChainedAuditLog, InMemoryMetrics, MetricsSink,
    };
    use caduceus_contracts::agent::{AgentDescriptor, AgentId, AgentRole};
    use caduceus_contracts::compliance::Actor;
    use caduceus_contracts::error::{CaduceusError, CaduceusResult};
    use caduceus_contracts::message::Message;
    use caduceus_contracts::workflow::{WorkflowId, WorkflowStep};
    use caduceus_orchestrator::{AgentHandler, AgentRegistry, Orchestrator};
    use caduceus_policy::{PolicyEngine, PolicySet};
    use caduceus_security::{FieldKeyring, ProcessingConfig, SecurityProcessor, TokenVault};

    use crate::external::{MockHealthRecords, MockKnowledge};

    use super::Platform;

    const POLICY: &str = r#"
        [[policies]]
        id = "hipaa"
        framework = "HIPAA"
        description = "HIPAA rules for the platform boundary"

        [[policies.rules]]
        id = "phi-read-mfa"
        description = "Reading PHI requires MFA"
        applies_to = "access"
        condition = 'classification == "phi" && action == "read"'
        directives = "require-mfa, log-access"
        severity = "high"

        [[policies.rules]]
        id = "query-authenticated"
        description = "Knowledge queries require authentication"
        applies_to = "access"
        condition = 'action == "knowledge-query"'
        directives = "require-authentication"

        [[policies.rules]]
        id = "phi-pseudonymize"
        description = "PHI payloads are pseudonymized before processing"
        applies_to = "data-handling"
        condition = 'classification == "phi"'
        directives = "pseudonymize"
        severity = "high"
    "#;

    struct EchoHandler;

    #[async_trait]
    impl AgentHandler for EchoHandler {
        async fn handle(&self, message: Message, _ctx: Option<Value>) -> CaduceusResult<Value> {
            Ok(json!({ "echo": message.payload }))
        }
    }

    fn platform() -> (Platform, Arc<ChainedAuditLog>, Arc<InMemoryMetrics>) {
        let log = Arc::new(ChainedAuditLog::new());
        let sink: Arc<dyn AuditSink> = Arc::new(BufferedAuditSink::new(Arc::clone(&log), 1));
        let metrics: Arc<InMemoryMetrics> = Arc::new(InMemoryMetrics::new());

        let mut policy = PolicyEngine::new(Arc::clone(&sink), Arc::clone(&metrics) as _);
        policy
            .register_set(PolicySet::from_toml_str(POLICY).unwrap())
            .unwrap();

        let security = SecurityProcessor::new(
            Arc::new(FieldKeyring::ephemeral()),
            Arc::new(TokenVault::new()),
            Arc::clone(&sink),
        );

        let orchestrator = Orchestrator::start(
            Arc::new(AgentRegistry::new()),
            Arc::clone(&sink),
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        );

        let platform = Platform::new(
            orchestrator,
            Arc::new(policy),
            Arc::new(security),
            Arc::new(MockHealthRecords),
            Arc::new(MockKnowledge),
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        );
        (platform, log, metrics)
    }

    /// PHI read without MFA: denied with the rule id, one violation stored,
    /// and no connector data touched.
    #[tokio::test]
    async fn test_get_patient_data_denied_without_mfa() {
        let (platform, _log, _metrics) = platform();
        let actor = Actor::new("dr-chen", "physician"); // no MFA

        match platform.get_patient_data(&actor, "patient-1001").await {
            Err(CaduceusError::AccessDenied { rule_ids, .. }) => {
                assert_eq!(rule_ids, vec!["phi-read-mfa"]);
            }
            other => panic!("expected AccessDenied, got {other:?}"),
        }
        assert_eq!(platform.policy().violations().active().len(), 1);
    }

    /// With MFA the summary comes back protected: SSN encrypted, contact
    /// identifiers tokenized, no plaintext PHI anywhere in the output.
    #[tokio::test]
    async fn test_get_patient_data_protected_output() {
        let (platform, _log, _metrics) = platform();
        let actor = Actor::new("dr-chen", "physician").with_mfa();

        let processed = platform.get_patient_data(&actor, "patient-1001").await.unwrap();

        let ssn = processed.data["patient"]["ssn"].as_str().unwrap();
        assert!(ssn.starts_with("enc:"), "ssn must be encrypted: {ssn}");

        let rendered = processed.data.to_string();
        assert!(!rendered.contains("123-45-6789"));
        assert!(!rendered.contains("Margaret Yoon"));
    }

    /// Policy-required transformations merge into the caller's config:
    /// the handling rule pseudonymizes PHI fields instead of the default
    /// encryption.
    #[tokio::test]
    async fn test_process_data_applies_policy_transforms() {
        let (platform, _log, _metrics) = platform();
        let actor = Actor::new("analyst", "researcher").with_mfa();

        let processed = platform
            .process_data(
                &actor,
                &json!({ "diagnosis": "hypertension", "ward": "east" }),
                &ProcessingConfig::default(),
            )
            .unwrap();

        let diagnosis = processed.data["diagnosis"].as_str().unwrap();
        assert!(
            diagnosis.starts_with("psn-"),
            "policy transform must win over the default: {diagnosis}"
        );
        assert_eq!(processed.data["ward"], json!("east"));
    }

    /// An unauthenticated actor cannot query; an authenticated one can,
    /// and the query emits the rag_query metric.
    #[tokio::test]
    async fn test_query_gated_and_metered() {
        let (platform, _log, metrics) = platform();

        let mut anonymous = Actor::new("kiosk", "public");
        anonymous.authenticated = false;
        assert!(matches!(
            platform.query(&anonymous, "drug interactions", &json!({})).await,
            Err(CaduceusError::AccessDenied { .. })
        ));
        assert_eq!(metrics.total("rag_query"), 0, "denied queries are not metered");

        let actor = Actor::new("dr-chen", "physician");
        let answer = platform.query(&actor, "drug interactions", &json!({})).await.unwrap();
        assert!(!answer.answer.is_empty());
        assert_eq!(metrics.total("rag_query"), 1);
    }

    /// Workflow input is protected before the first step: the agent sees
    /// the pseudonymized diagnosis, never the plaintext.
    #[tokio::test]
    async fn test_workflow_input_protected() {
        let (platform, _log, _metrics) = platform();
        let actor = Actor::new("dr-chen", "physician").with_mfa();

        let seen = Arc::new(Mutex::new(Vec::new()));
        struct Recording {
            seen: Arc<Mutex<Vec<Value>>>,
        }
        #[async_trait]
        impl AgentHandler for Recording {
            async fn handle(&self, message: Message, _ctx: Option<Value>) -> CaduceusResult<Value> {
                self.seen.lock().unwrap().push(message.payload.clone());
                Ok(json!({ "ok": true }))
            }
        }
        platform
            .orchestrator()
            .register_handler(AgentRole::Oncology, Arc::new(Recording { seen: Arc::clone(&seen) }));
        platform.orchestrator().register(AgentDescriptor::new(
            AgentId::new("oncology-1"),
            AgentRole::Oncology,
            vec!["phi:read".to_string()],
        ));

        let steps = vec![WorkflowStep {
            name: "review".to_string(),
            agent: AgentId::new("oncology-1"),
            request: json!({ "case": "{{data.diagnosis}}" }),
        }];

        let outcome = platform
            .execute_workflow(
                &actor,
                WorkflowId::new("tumor-board"),
                &steps,
                json!({ "diagnosis": "stage II adenocarcinoma" }),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert!(outcome.is_complete());
        let payloads = seen.lock().unwrap();
        let case = payloads[0]["case"].as_str().unwrap();
        assert!(case.starts_with("psn-"), "agent must not see plaintext: {case}");
    }

    /// send_agent_message is gated but otherwise passes through.
    #[tokio::test]
    async fn test_send_agent_message_gated() {
        let (platform, _log, _metrics) = platform();
        let actor = Actor::new("dr-chen", "physician");

        platform.orchestrator().register_handler(AgentRole::Imaging, Arc::new(EchoHandler));
        platform.orchestrator().register(AgentDescriptor::new(
            AgentId::new("imaging-1"),
            AgentRole::Imaging,
            vec![],
        ));

        let message = Message::event(
            actor.id.clone(),
            vec![AgentId::new("imaging-1")],
            json!({ "study": "ct-chest" }),
        );
        platform.send_agent_message(&actor, message).unwrap();
    }

    /// Reports and key rotation run behind the same gate.
    #[tokio::test]
    async fn test_report_and_rotation() {
        let (platform, _log, _metrics) = platform();
        let officer = Actor::new("compliance-officer", "compliance").with_mfa();

        // Produce one violation first.
        let no_mfa = Actor::new("dr-chen", "physician");
        let _ = platform.get_patient_data(&no_mfa, "patient-1001").await;

        let report = platform.generate_compliance_report(&officer).unwrap();
        assert_eq!(report.total_violations, 1);
        assert_eq!(report.by_framework["HIPAA"], 1);

        // Resolve it through the boundary.
        let id = platform.policy().violations().all()[0].id.clone();
        platform
            .resolve_violation(&officer, &id, "clinician enrolled in MFA")
            .unwrap();
        assert_eq!(platform.policy().violations().active().len(), 0);

        // Rotation is audited and returns the rotated fields.
        let with_mfa = Actor::new("dr-chen", "physician").with_mfa();
        platform.get_patient_data(&with_mfa, "patient-1001").await.unwrap();
        let rotated = platform.rotate_encryption_keys(&officer, None).unwrap();
        assert!(!rotated.is_empty());
    }
}
