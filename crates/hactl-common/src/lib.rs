//! Common types shared by the hactl crates
//!
//! This crate provides:
//! - The error taxonomy and structured report items
//! - Per-node operation results used by fan-out error aggregation
//! - Node address parsing helpers

pub mod address;
pub mod error;

pub use address::{parse_multiring_node, split_host_port};
pub use error::{HactlError, NodeOperationResult, ReportItem, Severity, raise_on_errors};
