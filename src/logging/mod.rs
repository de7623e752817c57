//! Logging infrastructure for the gateway
//!
//! Operational logs go through `tracing`; this module holds the audit trail
//! written for the line operators.

pub mod audit;

pub use audit::{AuditLogger, AuditRecord, AUDIT_HEADER};
