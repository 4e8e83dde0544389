//! Transport-layer configuration model and quorum advisor
//!
//! This crate owns everything that can be decided without touching a
//! node: the ordered section/attribute tree behind the corosync.conf
//! format, setup option validation, configuration generation for both
//! membership substrates, membership-list editing, and the
//! normalization of quorum tool output into a single snapshot with the
//! "would removing these nodes lose quorum?" decision function.

pub mod cman;
pub mod conf;
pub mod options;
pub mod quorum;
pub mod section;

pub use cman::{CcsCommand, build_cman_command_plan};
pub use conf::{
    ClusterConfig, NodeEntry, add_node_to_conf, conf_needs_ring1, conf_node_addresses,
    quorum_device_settings, remove_node_from_conf,
};
pub use options::{
    IpVersion, QuorumOptions, RingOptions, RrpMode, SetupOptionsInput, TotemOptions, Transport,
    TransportOptions, ValidatedOptions, validate_cman_options, validate_corosync_options,
};
pub use quorum::{
    QuorumNode, QuorumSnapshot, StopScope, is_node_offline_in_output, parse_cman_quorum_info,
    parse_quorumtool_output, would_lose_quorum,
};
pub use section::{ConfParseError, ConfigSection};
