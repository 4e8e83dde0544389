//! Cluster configuration model and corosync.conf generation
//!
//! `ClusterConfig` is the canonical in-memory form of the membership
//! configuration. It renders to the transport text format with the
//! top-level `totem`, `nodelist`, `quorum` and `logging` sections in
//! that order, and parses back from it. The free functions at the
//! bottom edit the membership list of an existing configuration in
//! place, which is the serving half of the add/remove-node protocol.

use hactl_common::HactlError;

use crate::options::{
    IpVersion, QuorumOptions, RingOptions, RrpMode, TotemOptions, Transport, TransportOptions,
    ValidatedOptions,
};
use crate::section::ConfigSection;

const LOG_FILE: &str = "/var/log/cluster/corosync.log";

/// One member of the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: u32,
    pub ring0_addr: String,
    pub ring1_addr: Option<String>,
}

/// The membership configuration of a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    pub cluster_name: String,
    pub transport: TransportOptions,
    pub totem: TotemOptions,
    pub quorum: QuorumOptions,
    pub nodes: Vec<NodeEntry>,
}

impl ClusterConfig {
    /// Assemble a configuration from validated options and node addresses
    ///
    /// Node ids are assigned sequentially from 1 in declaration order.
    /// The ring configuration must be uniform: either every node has a
    /// secondary address or none does.
    pub fn build(
        cluster_name: impl Into<String>,
        node_addrs: &[(String, Option<String>)],
        options: ValidatedOptions,
    ) -> Result<Self, HactlError> {
        let dual_ring = node_addrs.iter().any(|(_, ring1)| ring1.is_some());
        if dual_ring && node_addrs.iter().any(|(_, ring1)| ring1.is_none()) {
            return Err(HactlError::validation(
                "if one node is configured for RRP, all nodes must be configured for RRP",
            ));
        }
        let nodes = node_addrs
            .iter()
            .enumerate()
            .map(|(index, (ring0, ring1))| NodeEntry {
                id: index as u32 + 1,
                ring0_addr: ring0.clone(),
                ring1_addr: ring1.clone(),
            })
            .collect();
        Ok(Self {
            cluster_name: cluster_name.into(),
            transport: options.transport,
            totem: options.totem,
            quorum: options.quorum,
            nodes,
        })
    }

    /// Whether members of this cluster must carry a secondary address
    pub fn needs_ring1(&self) -> bool {
        self.nodes.iter().any(|n| n.ring1_addr.is_some())
    }

    /// Primary addresses of all members, in declaration order
    pub fn node_addresses(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.ring0_addr.clone()).collect()
    }

    /// Render to the transport configuration text format
    pub fn render(&self) -> String {
        self.to_section().render()
    }

    /// Build the section tree: totem, nodelist, quorum, logging
    pub fn to_section(&self) -> ConfigSection {
        let mut root = ConfigSection::root();

        let mut totem = ConfigSection::new("totem");
        totem.add_attribute("version", "2");
        totem.add_attribute("secauth", "off");
        totem.add_attribute("cluster_name", &self.cluster_name);
        totem.add_attribute("transport", self.transport.transport);
        if let Some(mode) = self.transport.rrp_mode {
            totem.add_attribute("rrp_mode", mode);
        }
        if let Some(ip_version) = self.transport.ip_version {
            totem.add_attribute("ip_version", ip_version);
        }
        for (name, value) in self.totem.entries() {
            totem.add_attribute(name, value);
        }
        if self.transport.transport == Transport::Udp {
            for (ring_number, ring) in self.transport.rings.iter().enumerate() {
                let mut interface = ConfigSection::new("interface");
                interface.add_attribute("ringnumber", ring_number);
                if let Some(addr) = &ring.bind_addr {
                    interface.add_attribute("bindnetaddr", addr);
                }
                if ring.broadcast {
                    interface.add_attribute("broadcast", "yes");
                } else {
                    if let Some(mcastaddr) = &ring.mcastaddr {
                        interface.add_attribute("mcastaddr", mcastaddr);
                    }
                    if let Some(mcastport) = &ring.mcastport {
                        interface.add_attribute("mcastport", mcastport);
                    }
                    if let Some(ttl) = &ring.ttl {
                        interface.add_attribute("ttl", ttl);
                    }
                }
                totem.add_section(interface);
            }
        }
        root.add_section(totem);

        let mut nodelist = ConfigSection::new("nodelist");
        for node in &self.nodes {
            nodelist.add_section(node_section(node));
        }
        root.add_section(nodelist);

        let mut quorum = ConfigSection::new("quorum");
        quorum.add_attribute("provider", "corosync_votequorum");
        for (name, value) in self.quorum.entries() {
            quorum.add_attribute(name, value);
        }
        if self.nodes.len() == 2 && !self.quorum.auto_tie_breaker_active() {
            quorum.add_attribute("two_node", "1");
        }
        root.add_section(quorum);

        let mut logging = ConfigSection::new("logging");
        logging.add_attribute("to_logfile", "yes");
        logging.add_attribute("logfile", LOG_FILE);
        logging.add_attribute("to_syslog", "yes");
        root.add_section(logging);

        root
    }

    /// Parse configuration text back into the model
    pub fn parse(text: &str) -> Result<Self, HactlError> {
        let root = parse_section_tree(text)?;

        let totem = root
            .section("totem")
            .ok_or_else(|| HactlError::validation("missing totem section"))?;
        let transport = match totem.attribute("transport") {
            None | Some("udp") => Transport::Udp,
            Some("udpu") => Transport::Udpu,
            Some("udpb") => Transport::Udpb,
            Some(other) => {
                return Err(HactlError::validation(format!(
                    "unknown transport '{}' in configuration",
                    other
                )));
            }
        };
        let rrp_mode = match totem.attribute("rrp_mode") {
            None => None,
            Some("passive") => Some(RrpMode::Passive),
            Some("active") => Some(RrpMode::Active),
            Some(other) => {
                return Err(HactlError::validation(format!(
                    "unknown rrp_mode '{}' in configuration",
                    other
                )));
            }
        };
        let rings = totem
            .sections_named("interface")
            .map(|interface| RingOptions {
                bind_addr: interface.attribute("bindnetaddr").map(str::to_string),
                broadcast: interface.attribute("broadcast") == Some("yes"),
                mcastaddr: interface.attribute("mcastaddr").map(str::to_string),
                mcastport: interface.attribute("mcastport").map(str::to_string),
                ttl: interface.attribute("ttl").map(str::to_string),
            })
            .collect();

        let mut nodes = Vec::new();
        if let Some(nodelist) = root.section("nodelist") {
            for node in nodelist.sections_named("node") {
                let ring0_addr = node
                    .attribute("ring0_addr")
                    .ok_or_else(|| HactlError::validation("node entry without ring0_addr"))?
                    .to_string();
                let id = node
                    .attribute("nodeid")
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| HactlError::validation("node entry without a numeric nodeid"))?;
                nodes.push(NodeEntry {
                    id,
                    ring0_addr,
                    ring1_addr: node.attribute("ring1_addr").map(str::to_string),
                });
            }
        }

        let quorum = root.section("quorum");
        let quorum_attr = |name: &str| {
            quorum
                .and_then(|q| q.attribute(name))
                .map(str::to_string)
        };

        Ok(Self {
            cluster_name: totem
                .attribute("cluster_name")
                .unwrap_or_default()
                .to_string(),
            transport: TransportOptions {
                transport,
                rrp_mode,
                ip_version: (totem.attribute("ip_version") == Some("ipv6"))
                    .then_some(IpVersion::Ipv6),
                rings,
                broadcast: false,
            },
            totem: TotemOptions {
                token: totem.attribute("token").map(str::to_string),
                token_coefficient: totem.attribute("token_coefficient").map(str::to_string),
                join: totem.attribute("join").map(str::to_string),
                consensus: totem.attribute("consensus").map(str::to_string),
                miss_count_const: totem.attribute("miss_count_const").map(str::to_string),
                fail_recv_const: totem.attribute("fail_recv_const").map(str::to_string),
            },
            quorum: QuorumOptions {
                wait_for_all: quorum_attr("wait_for_all"),
                auto_tie_breaker: quorum_attr("auto_tie_breaker"),
                last_man_standing: quorum_attr("last_man_standing"),
                last_man_standing_window: quorum_attr("last_man_standing_window"),
            },
            nodes,
        })
    }
}

fn node_section(node: &NodeEntry) -> ConfigSection {
    let mut section = ConfigSection::new("node");
    section.add_attribute("ring0_addr", &node.ring0_addr);
    if let Some(ring1) = &node.ring1_addr {
        section.add_attribute("ring1_addr", ring1);
    }
    section.add_attribute("nodeid", node.id);
    section
}

fn parse_section_tree(text: &str) -> Result<ConfigSection, HactlError> {
    ConfigSection::parse(text).map_err(|e| HactlError::validation(e.to_string()))
}

/// Recompute the two-node safety marker after a membership change
fn refresh_two_node(root: &mut ConfigSection) {
    let node_count = root
        .section("nodelist")
        .map(|n| n.sections_named("node").count())
        .unwrap_or(0);
    let Some(quorum) = root.section_mut("quorum") else {
        return;
    };
    let auto_tie_breaker = quorum.attribute("auto_tie_breaker") == Some("1");
    if node_count == 2 && !auto_tie_breaker {
        quorum.set_attribute("two_node", "1");
    } else {
        quorum.remove_attribute("two_node");
    }
}

/// Add a node to an existing configuration
///
/// The new node gets the next free numeric id; the two-node marker is
/// recomputed for the resulting membership.
pub fn add_node_to_conf(
    text: &str,
    ring0_addr: &str,
    ring1_addr: Option<&str>,
) -> Result<String, HactlError> {
    let mut root = parse_section_tree(text)?;
    if root.section("nodelist").is_none() {
        root.add_section(ConfigSection::new("nodelist"));
    }
    let nodelist = root.section_mut("nodelist").expect("nodelist just ensured");
    if nodelist
        .sections_named("node")
        .any(|n| n.attribute("ring0_addr") == Some(ring0_addr))
    {
        return Err(HactlError::validation(format!(
            "node '{}' already exists in the configuration",
            ring0_addr
        )));
    }
    let next_id = nodelist
        .sections_named("node")
        .filter_map(|n| n.attribute("nodeid").and_then(|v| v.parse::<u32>().ok()))
        .max()
        .unwrap_or(0)
        + 1;
    nodelist.add_section(node_section(&NodeEntry {
        id: next_id,
        ring0_addr: ring0_addr.to_string(),
        ring1_addr: ring1_addr.map(str::to_string),
    }));
    refresh_two_node(&mut root);
    Ok(root.render())
}

/// Remove a node from an existing configuration
///
/// The node is matched against both ring addresses; the two-node
/// marker is recomputed for the remaining membership.
pub fn remove_node_from_conf(text: &str, node: &str) -> Result<String, HactlError> {
    let mut root = parse_section_tree(text)?;
    let Some(nodelist) = root.section_mut("nodelist") else {
        return Err(HactlError::validation(format!(
            "node '{}' does not appear to exist in configuration",
            node
        )));
    };
    let before = nodelist.sections().len();
    nodelist.retain_sections(|section| {
        section.name() != "node"
            || (section.attribute("ring0_addr") != Some(node)
                && section.attribute("ring1_addr") != Some(node))
    });
    if nodelist.sections().len() == before {
        return Err(HactlError::validation(format!(
            "node '{}' does not appear to exist in configuration",
            node
        )));
    }
    refresh_two_node(&mut root);
    Ok(root.render())
}

/// Primary addresses of the members recorded in a configuration
pub fn conf_node_addresses(text: &str) -> Result<Vec<String>, HactlError> {
    Ok(ClusterConfig::parse(text)?.node_addresses())
}

/// Whether a configuration requires a secondary ring address per node
pub fn conf_needs_ring1(text: &str) -> Result<bool, HactlError> {
    Ok(ClusterConfig::parse(text)?.needs_ring1())
}

/// Quorum device model and its network host, when one is configured
///
/// Reads `quorum.device.model` and, for the network model, the host
/// from the matching model options subsection.
pub fn quorum_device_settings(text: &str) -> Result<Option<(String, Option<String>)>, HactlError> {
    let root = parse_section_tree(text)?;
    let Some(device) = root.section("quorum").and_then(|q| q.section("device")) else {
        return Ok(None);
    };
    let Some(model) = device.attribute("model") else {
        return Ok(None);
    };
    let host = device
        .section(model)
        .and_then(|m| m.attribute("host"))
        .map(str::to_string);
    Ok(Some((model.to_string(), host)))
}
