//! # caduceus-platform
//!
//! The caller-facing boundary of the CADUCEUS platform.
//!
//! Every operation — workflow execution, knowledge queries, data
//! processing, patient-record access, agent messaging, compliance
//! reporting, key rotation — first clears the policy engine's access
//! evaluation and rejects with a descriptive `AccessDenied` naming the
//! violated rules. Allowed operations route through the security layer's
//! transformations before any data reaches an agent or leaves the
//! boundary.
//!
//! External collaborators (the health-record connector and the
//! knowledge-query service) are consumed behind narrow async traits with
//! fictional in-memory mocks for tests and the demo.

pub mod external;
pub mod report;
pub mod service;

pub use external::{
    HealthRecordConnector, KnowledgeQuery, MockHealthRecords, MockKnowledge, PatientSummary,
    QueryAnswer,
};
pub use report::{ComplianceReport, ViolationSummary};
pub use service::Platform;
