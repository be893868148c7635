//! # caduceus-orchestrator
//!
//! The coordination core of the CADUCEUS platform: agent registry,
//! message bus, background dispatch, and the sequential workflow engine.
//!
//! ## Execution model
//!
//! ```text
//! send() ──► inbox ──► dispatch loop ──► per-agent queue ──► worker ──► handler
//!                │                                             │
//!                └── context merge (correlation id)            └── response / error
//!                                                                   back via send()
//! ```
//!
//! One dispatch loop pops messages FIFO and fans out to per-agent worker
//! tasks: a single agent never runs two handlers concurrently, while
//! different agents proceed in parallel. Handler errors and panics are
//! absorbed at the worker boundary — they mark the agent, update metrics,
//! and emit audit events, but the loop always survives.
//!
//! Workflows execute steps strictly sequentially, waiting on each step's
//! correlation id with a mandatory timeout.

pub mod bus;
pub mod handler;
pub mod registry;
pub mod workflow;

pub use bus::Orchestrator;
pub use handler::AgentHandler;
pub use registry::AgentRegistry;
pub use workflow::{render_template, WorkflowHandle};
