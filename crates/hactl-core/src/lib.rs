//! Membership lifecycle orchestration
//!
//! This crate provides:
//! - The remote node client contract and its HTTP implementation
//! - The host runtime contract and its systemd implementation
//! - Bounded-parallel fan-out over node sets
//! - Deadline-driven convergence waiting
//! - The membership coordinator tying it all together

pub mod client;
pub mod coordinator;
pub mod fanout;
pub mod host;
pub mod waiter;

pub use client::{
    BulkRequestKind, HttpNodeClient, NodeClientConfig, NodeError, NodeErrorKind, NodeStatus,
    PushStatus, RemoteNodeClient,
};
pub use coordinator::{
    AddNodeRequest, FleetSelection, MembershipCoordinator, RemoveNodeRequest, SetupRequest,
    StartRequest, StopRequest,
};
pub use fanout::{FanoutReport, NodeFanout};
pub use host::{HostPaths, HostRuntime, SystemdHost, ToolOutput};
pub use waiter::{ConvergenceWaiter, WaitOutcome};
