//! Error types and structured reports for hactl
//!
//! This module defines:
//! - `HactlError`: the application error enum
//! - `ReportItem`: a structured validation/progress report with severity
//! - `NodeOperationResult`: the per-node outcome of a fan-out batch

use serde::{Deserialize, Serialize};

/// Severity of a report item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A structured report produced by validation and multi-step operations
///
/// Reports replace in-band error printing: validation collects a list of
/// these and the caller decides whether the errors are fatal. An item
/// marked `forceable` is downgraded to a warning when the caller supplies
/// the force override.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    pub severity: Severity,
    pub message: String,
    pub forceable: bool,
}

impl ReportItem {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            forceable: false,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            forceable: false,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            forceable: false,
        }
    }

    /// Mark this report as overridable by force
    pub fn forceable(mut self) -> Self {
        self.forceable = true;
        self
    }

    /// Downgrade a forceable error to a warning
    pub fn downgraded(mut self) -> Self {
        if self.severity == Severity::Error && self.forceable {
            self.severity = Severity::Warning;
        }
        self
    }
}

impl std::fmt::Display for ReportItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "Error: {}", self.message)?,
            Severity::Warning => write!(f, "Warning: {}", self.message)?,
            Severity::Info => write!(f, "{}", self.message)?,
        }
        if self.forceable && self.severity == Severity::Error {
            write!(f, ", use --force to override")?;
        }
        Ok(())
    }
}

/// Outcome of one node within a fan-out batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOperationResult {
    pub node: String,
    pub success: bool,
    pub message: String,
}

impl NodeOperationResult {
    pub fn success(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            success: false,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NodeOperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node, self.message)
    }
}

/// Application error types
#[derive(thiserror::Error, Debug)]
pub enum HactlError {
    /// Malformed or contradictory options, raised before any mutation
    #[error("{}", format_reports(.0))]
    Validation(Vec<ReportItem>),

    /// A single node could not be reached or refused the operation
    #[error("{node}: {message}")]
    Communication { node: String, message: String },

    /// A destructive operation would drop the cluster below quorum
    #[error("{0}")]
    QuorumSafety(String),

    /// Local persistence of the transport configuration failed
    #[error("unable to write cluster configuration: {0}")]
    ConfigWrite(#[source] std::io::Error),

    /// A multi-node membership transaction was not accepted by any node,
    /// leaving earlier per-node steps partially applied
    #[error("unable to update any nodes\n{}", format_node_results(.0))]
    PartialTransaction(Vec<NodeOperationResult>),

    /// Aggregated, node-labelled failure report for a whole batch
    #[error("{0}")]
    Aggregate(String),
}

impl HactlError {
    pub fn validation(message: impl Into<String>) -> Self {
        HactlError::Validation(vec![ReportItem::error(message)])
    }

    pub fn communication(node: impl Into<String>, message: impl Into<String>) -> Self {
        HactlError::Communication {
            node: node.into(),
            message: message.into(),
        }
    }
}

fn format_reports(reports: &[ReportItem]) -> String {
    reports
        .iter()
        .filter(|r| r.severity == Severity::Error)
        .map(|r| r.message.clone())
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_node_results(results: &[NodeOperationResult]) -> String {
    results
        .iter()
        .filter(|r| !r.success)
        .map(NodeOperationResult::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a report list into fatal errors and pass-through items
///
/// Returns the non-error items for the caller to surface when no error
/// severity item is present, otherwise the whole list becomes a
/// `Validation` error.
pub fn raise_on_errors(reports: Vec<ReportItem>) -> Result<Vec<ReportItem>, HactlError> {
    if reports.iter().any(|r| r.severity == Severity::Error) {
        Err(HactlError::Validation(reports))
    } else {
        Ok(reports)
    }
}
