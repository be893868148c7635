//! # caduceus-policy
//!
//! A TOML-driven compliance policy engine for the CADUCEUS platform.
//!
//! ## Overview
//!
//! Policies group rules under named regulatory frameworks (HIPAA, GDPR,
//! CMMC, …). Each rule carries a condition — a small typed expression over
//! dotted paths into the evaluation context, compiled once at
//! registration — and a directive string parsed into requirements
//! (authentication, MFA, minimum-necessary, access logging) or
//! transformation demands (encrypt, tokenize, anonymize, pseudonymize).
//!
//! Every matching rule is evaluated — no short-circuiting — so one call
//! can produce several violations and follow-up actions. Violations are
//! append-only and queryable by unresolved status; resolving one requires
//! a remediation note.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use caduceus_policy::{PolicyEngine, PolicySet};
//!
//! let mut engine = PolicyEngine::new(audit, metrics);
//! engine.register_set(PolicySet::from_file(Path::new("policies/hipaa.toml"))?)?;
//!
//! let decision = engine.evaluate_access(&actor, "patient/1001", "read", &context);
//! if !decision.allowed {
//!     // decision.violations names every unmet rule requirement
//! }
//! ```

pub mod condition;
pub mod engine;
pub mod rule;
pub mod violations;

pub use condition::Condition;
pub use engine::PolicyEngine;
pub use rule::{
    parse_directives, CompiledPolicy, CompiledRule, Directive, PolicyConfig, PolicySet,
    RuleConfig, RuleKind,
};
pub use violations::ViolationStore;
