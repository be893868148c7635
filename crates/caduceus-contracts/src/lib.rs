//! # caduceus-contracts
//!
//! Shared types, decisions, and error taxonomy for the CADUCEUS platform.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate — only data definitions and error types.

pub mod agent;
pub mod audit;
pub mod classification;
pub mod compliance;
pub mod error;
pub mod message;
pub mod paths;
pub mod workflow;
