//! Demo scenarios wired against real CADUCEUS components.
//!
//! Every scenario builds the full stack — policy engine, security layer,
//! orchestrator, audit chain, metrics — with mock external connectors and
//! deterministic agents. All data is hardcoded and fictional.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use caduceus_audit::{
    AuditSink, BufferedAuditSink, ChainedAuditLog, InMemoryMetrics, MetricsSink,
};
use caduceus_contracts::agent::{AgentDescriptor, AgentId, AgentRole};
use caduceus_contracts::compliance::Actor;
use caduceus_contracts::error::{CaduceusError, CaduceusResult};
use caduceus_contracts::workflow::{WorkflowId, WorkflowStep};
use caduceus_orchestrator::{AgentHandler, AgentRegistry, Orchestrator};
use caduceus_platform::{MockHealthRecords, MockKnowledge, Platform};
use caduceus_policy::{PolicyEngine, PolicySet};
use caduceus_contracts::classification::TransformationKind;
use caduceus_security::{
    AnonymizeStrategy, FieldKeyring, FieldTransform, ProcessingConfig, SecurityProcessor,
    TokenVault,
};

/// Demo policy set covering HIPAA, GDPR, and CMMC rules.
const DEMO_POLICY: &str = include_str!("../policies/caduceus.toml");

// ── Demo agents ───────────────────────────────────────────────────────────────

/// Returns a fixed chart summary for the requested patient.
struct RecordsAgent;

#[async_trait]
impl AgentHandler for RecordsAgent {
    async fn handle(
        &self,
        message: caduceus_contracts::message::Message,
        _shared_context: Option<Value>,
    ) -> CaduceusResult<Value> {
        let patient_id = message.payload["patient_id"].as_str().unwrap_or("unknown");
        Ok(json!({
            "patient_id": patient_id,
            "summary": "62-year-old with managed type 2 diabetes and hypertension",
            "last_visit": "2026-07-28",
        }))
    }
}

/// Produces a triage priority from the chart summary.
struct OncologyAgent;

#[async_trait]
impl AgentHandler for OncologyAgent {
    async fn handle(
        &self,
        message: caduceus_contracts::message::Message,
        _shared_context: Option<Value>,
    ) -> CaduceusResult<Value> {
        let summary = message.payload["summary"].as_str().unwrap_or("");
        let priority = if summary.contains("hypertension") { "high" } else { "routine" };
        Ok(json!({
            "assessment": "case reviewed; imaging recommended before board review",
            "priority": priority,
        }))
    }
}

/// Books the next slot matching the requested priority.
struct SchedulingAgent;

#[async_trait]
impl AgentHandler for SchedulingAgent {
    async fn handle(
        &self,
        message: caduceus_contracts::message::Message,
        _shared_context: Option<Value>,
    ) -> CaduceusResult<Value> {
        let priority = message.payload["priority"].as_str().unwrap_or("routine");
        let slot = if priority == "high" {
            "2026-08-10T08:00:00Z"
        } else {
            "2026-08-24T14:30:00Z"
        };
        Ok(json!({ "slot": slot, "priority": priority }))
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// The assembled demo stack.
pub struct Demo {
    pub platform: Platform,
    pub log: Arc<ChainedAuditLog>,
    pub sink: Arc<BufferedAuditSink>,
    pub metrics: Arc<InMemoryMetrics>,
}

/// Build the full stack with the demo policy set, mock connectors, and
/// three registered agents.
pub fn build() -> CaduceusResult<Demo> {
    let log = Arc::new(ChainedAuditLog::new());
    let sink = Arc::new(BufferedAuditSink::new(Arc::clone(&log), 8));
    let audit: Arc<dyn AuditSink> = Arc::clone(&sink) as _;
    let metrics = Arc::new(InMemoryMetrics::new());

    let mut policy = PolicyEngine::new(
        Arc::clone(&audit),
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
    );
    policy.register_set(PolicySet::from_toml_str(DEMO_POLICY)?)?;

    let security = SecurityProcessor::new(
        Arc::new(FieldKeyring::ephemeral()),
        Arc::new(TokenVault::new()),
        Arc::clone(&audit),
    );

    let orchestrator = Orchestrator::start(
        Arc::new(AgentRegistry::new()),
        Arc::clone(&audit),
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
    );
    orchestrator.register_handler(AgentRole::Records, Arc::new(RecordsAgent));
    orchestrator.register_handler(AgentRole::Oncology, Arc::new(OncologyAgent));
    orchestrator.register_handler(AgentRole::Scheduling, Arc::new(SchedulingAgent));
    orchestrator.register(AgentDescriptor::new(
        AgentId::new("records-1"),
        AgentRole::Records,
        vec!["phi:read".to_string()],
    ));
    orchestrator.register(AgentDescriptor::new(
        AgentId::new("oncology-1"),
        AgentRole::Oncology,
        vec!["phi:read".to_string()],
    ));
    orchestrator.register(AgentDescriptor::new(
        AgentId::new("scheduling-1"),
        AgentRole::Scheduling,
        vec![],
    ));

    let platform = Platform::new(
        orchestrator,
        Arc::new(policy),
        Arc::new(security),
        Arc::new(MockHealthRecords),
        Arc::new(MockKnowledge),
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
    );

    Ok(Demo {
        platform,
        log,
        sink,
        metrics,
    })
}

// ── Scenario 1: clinical workflow ─────────────────────────────────────────────

/// Three agents collaborate on a tumor-board preparation workflow. The
/// PHI input is transformed before the first step; each step's template
/// draws on the prior step's result.
pub async fn clinical_workflow() -> CaduceusResult<()> {
    println!("=== Scenario 1: Clinical Workflow ===");
    println!();

    let demo = build()?;
    let actor = Actor::new("dr-chen", "physician").with_mfa();

    let steps = vec![
        WorkflowStep {
            name: "gather".to_string(),
            agent: AgentId::new("records-1"),
            request: json!({ "action": "fetch-summary", "patient_id": "{{data.patient_id}}" }),
        },
        WorkflowStep {
            name: "assess".to_string(),
            agent: AgentId::new("oncology-1"),
            request: json!({ "action": "assess", "summary": "{{results.gather.summary}}" }),
        },
        WorkflowStep {
            name: "schedule".to_string(),
            agent: AgentId::new("scheduling-1"),
            request: json!({ "action": "book", "priority": "{{results.assess.priority}}" }),
        },
    ];

    let outcome = demo
        .platform
        .execute_workflow(
            &actor,
            WorkflowId::new("tumor-board-prep"),
            &steps,
            json!({
                "patient_id": "patient-1001",
                "diagnosis": "suspected stage II adenocarcinoma",
            }),
            Duration::from_secs(5),
        )
        .await?;

    println!("  Workflow:        tumor-board-prep (3 steps, strictly sequential)");
    println!("  Status:          {:?}", outcome.status);
    for (step, result) in &outcome.results {
        println!("  Result[{step}]: {result}");
    }

    demo.sink.flush();
    println!();
    println!("  Audit entries:      {}", demo.log.len());
    println!(
        "  Chain integrity:    {}",
        if demo.log.verify_integrity() { "VERIFIED" } else { "FAILED" }
    );
    println!(
        "  workflow_execution: {}",
        demo.metrics.total("workflow_execution")
    );

    for descriptor in demo.platform.orchestrator().registry().all() {
        println!(
            "  Agent {:<14} handled {} request(s), success rate {:.2}",
            descriptor.id.0, descriptor.metrics.requests_handled, descriptor.metrics.success_rate
        );
    }
    println!();
    Ok(())
}

// ── Scenario 2: access control ────────────────────────────────────────────────

/// The same PHI read, twice: denied without MFA (with a violation record
/// and an "enable-mfa" follow-up), allowed with MFA — and even then the
/// SSN leaves the boundary encrypted.
pub async fn access_control() -> CaduceusResult<()> {
    println!("=== Scenario 2: Access Control ===");
    println!();

    let demo = build()?;

    let no_mfa = Actor::new("dr-chen", "physician");
    println!("  Attempt A: dr-chen WITHOUT MFA reads patient-1001");
    match demo.platform.get_patient_data(&no_mfa, "patient-1001").await {
        Err(CaduceusError::AccessDenied { rule_ids, reason, .. }) => {
            println!("  Decision:        DENIED ({reason})");
            println!("  Violated rules:  {}", rule_ids.join(", "));
        }
        other => println!("  Unexpected: {other:?}"),
    }
    let active = demo.platform.policy().violations().active();
    println!("  Active violations recorded: {}", active.len());
    println!();

    let with_mfa = Actor::new("dr-chen", "physician").with_mfa();
    println!("  Attempt B: dr-chen WITH MFA reads patient-1001");
    let processed = demo.platform.get_patient_data(&with_mfa, "patient-1001").await?;
    println!("  Decision:        ALLOWED");
    println!("  Classification:  {}", processed.metadata.classification);
    println!(
        "  Protected ssn:   {}",
        processed.data["patient"]["ssn"].as_str().unwrap_or("?")
    );
    println!(
        "  Transformations: {}",
        processed
            .metadata
            .applied
            .iter()
            .map(|a| format!("{}({})", a.kind, a.field))
            .collect::<Vec<_>>()
            .join(", ")
    );

    demo.sink.flush();
    println!();
    println!("  Audit entries:   {}", demo.log.len());
    println!(
        "  Chain integrity: {}",
        if demo.log.verify_integrity() { "VERIFIED" } else { "FAILED" }
    );
    println!();
    Ok(())
}

// ── Scenario 3: data protection ───────────────────────────────────────────────

/// The full transformation menu on one intake payload, a detokenize
/// round-trip, and what key rotation does to old ciphertext.
pub async fn data_protection() -> CaduceusResult<()> {
    println!("=== Scenario 3: Data Protection ===");
    println!();

    let demo = build()?;
    let actor = Actor::new("intake-clerk", "intake").with_mfa();

    let payload = json!({
        "patient_id": "patient-2002",
        "ssn": "987-65-4321",
        "email": "dev.okafor@example.org",
        "age": 37,
        "zip": "94110",
        "note": "Reached patient at 555-867-5309 to confirm intake.",
    });

    let config = ProcessingConfig {
        operation: "intake".to_string(),
        transformations: vec![
            FieldTransform {
                field: "note".to_string(),
                kind: TransformationKind::Sanitize,
                strategy: None,
            },
            FieldTransform {
                field: "age".to_string(),
                kind: TransformationKind::Anonymize,
                strategy: Some(AnonymizeStrategy::AgeBucket),
            },
            FieldTransform {
                field: "zip".to_string(),
                kind: TransformationKind::Anonymize,
                strategy: Some(AnonymizeStrategy::ZipTruncate),
            },
            FieldTransform {
                field: "patient_id".to_string(),
                kind: TransformationKind::Pseudonymize,
                strategy: None,
            },
        ],
        ..ProcessingConfig::default()
    };

    let processed = demo.platform.process_data(&actor, &payload, &config)?;
    println!("  Classification: {}", processed.metadata.classification);
    if let Some(fields) = processed.data.as_object() {
        for (field, value) in fields {
            println!("  {field:<12} -> {value}");
        }
    }

    // PII tokens reverse only through the audited vault path.
    let token = processed.data["email"].as_str().unwrap_or_default().to_string();
    let original = demo.platform.security().detokenize(&actor.id, &token)?;
    println!();
    println!("  detokenize({token}) -> {original}");

    // Rotation makes old ciphertext undecryptable without migration.
    let ssn_cipher = processed.data["ssn"].as_str().unwrap_or_default().to_string();
    let rotated = demo.platform.rotate_encryption_keys(&actor, None)?;
    println!("  Rotated field keys: {}", rotated.join(", "));
    match demo.platform.security().cipher().decrypt("ssn", &ssn_cipher) {
        Err(e) => println!("  Decrypt after rotation: {e}"),
        Ok(_) => println!("  Decrypt after rotation unexpectedly succeeded"),
    }

    demo.sink.flush();
    println!();
    println!("  Audit entries:   {}", demo.log.len());
    println!(
        "  Chain integrity: {}",
        if demo.log.verify_integrity() { "VERIFIED" } else { "FAILED" }
    );
    println!();
    Ok(())
}

// ── Scenario 4: compliance report ─────────────────────────────────────────────

/// Accumulate violations from denied operations, resolve one, and print
/// the rollup the compliance officer sees.
pub async fn compliance_report() -> CaduceusResult<()> {
    println!("=== Scenario 4: Compliance Report ===");
    println!();

    let demo = build()?;

    // Two denied operations put violations on record.
    let no_mfa = Actor::new("dr-chen", "physician");
    let _ = demo.platform.get_patient_data(&no_mfa, "patient-1001").await;
    let _ = demo.platform.rotate_encryption_keys(&no_mfa, None);

    let officer = Actor::new("compliance-officer", "compliance").with_mfa();
    let violations = demo.platform.policy().violations().all();
    if let Some(first) = violations.first() {
        demo.platform
            .resolve_violation(&officer, &first.id, "clinician enrolled in MFA on 2026-08-06")?;
    }

    let report = demo.platform.generate_compliance_report(&officer)?;
    println!("  Generated at:      {}", report.generated_at);
    println!("  Total violations:  {}", report.total_violations);
    println!("  Active violations: {}", report.active_violations);
    for (severity, count) in &report.by_severity {
        println!("  By severity [{severity}]: {count}");
    }
    for (framework, count) in &report.by_framework {
        println!("  By framework [{framework}]: {count}");
    }
    for entry in &report.recent {
        println!(
            "  {} {} by {} ({}, resolved: {})",
            entry.timestamp.format("%H:%M:%S"),
            entry.rule_id,
            entry.actor,
            entry.severity,
            entry.resolved
        );
    }
    println!();
    Ok(())
}
