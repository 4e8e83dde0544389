//! Quorum status normalization and the quorum-loss decision
//!
//! Two different tools report quorum state in two different text
//! formats. Each format gets its own normalization function; both
//! produce the same `QuorumSnapshot` so the decision function never
//! cares which substrate the cluster runs. A parser returning `None`
//! means the status is not determinable and callers must require an
//! explicit override instead of assuming safety.

use serde::{Deserialize, Serialize};

/// One online member as reported by the quorum tool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumNode {
    pub name: String,
    pub votes: u64,
    pub local: bool,
}

/// Normalized quorum state of the cluster
///
/// `quorum_threshold` is the effective threshold reported by the tool,
/// already adjusted by the membership layer for auto_tie_breaker and
/// last_man_standing. `nodes` lists only online members, so the sum of
/// their votes is the vote count currently present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSnapshot {
    pub quorate: bool,
    pub quorum_threshold: u64,
    pub nodes: Vec<QuorumNode>,
}

impl QuorumSnapshot {
    pub fn votes_present(&self) -> u64 {
        self.nodes.iter().map(|n| n.votes).sum()
    }
}

/// Which nodes a stop/removal takes out of the membership
#[derive(Clone, Copy, Debug)]
pub enum StopScope<'a> {
    /// Only the local node leaves
    Local,
    /// An explicit node set leaves
    Nodes(&'a [String]),
}

/// Whether taking the scoped nodes offline drops the cluster below quorum
///
/// A cluster that is not quorate has nothing left to lose, so stopping
/// nodes in it is always safe. Otherwise the votes of the remaining
/// online members must still reach the effective threshold.
pub fn would_lose_quorum(snapshot: &QuorumSnapshot, scope: StopScope<'_>) -> bool {
    if !snapshot.quorate {
        return false;
    }
    let remaining: u64 = snapshot
        .nodes
        .iter()
        .filter(|node| match scope {
            StopScope::Local => !node.local,
            StopScope::Nodes(leaving) => !leaving.iter().any(|l| l == &node.name),
        })
        .map(|node| node.votes)
        .sum();
    remaining < snapshot.quorum_threshold
}

/// Markers the quorum tools print when the membership layer is down
///
/// Output carrying one of these means the node is already offline,
/// which callers treat as "safe to stop".
pub fn is_node_offline_in_output(output: &str) -> bool {
    const OFFLINE_MARKERS: &[&str] = &[
        "Cannot initialize QUORUM service",
        "Cannot initialize CMAP service",
        "Cannot initialize COROSYNC service",
        "Cannot open connection to cman",
    ];
    OFFLINE_MARKERS.iter().any(|marker| output.contains(marker))
}

fn leading_number(value: &str) -> Option<u64> {
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Normalize `corosync-quorumtool -p -s` output
///
/// Returns `None` when any required field is missing or malformed;
/// the threshold value may carry an "Activity blocked" suffix.
pub fn parse_quorumtool_output(output: &str) -> Option<QuorumSnapshot> {
    let mut quorate = None;
    let mut threshold = None;
    let mut nodes = None::<Vec<QuorumNode>>;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(list) = nodes.as_mut() {
            if line.starts_with('-') || line.starts_with("Nodeid") {
                continue;
            }
            let mut parts = line.split_whitespace();
            let _nodeid = parts.next()?;
            let votes = parts.next()?.parse().ok()?;
            let name = parts.next()?.to_string();
            let local = parts.next() == Some("(local)");
            list.push(QuorumNode { name, votes, local });
        } else if line == "Membership information" {
            nodes = Some(Vec::new());
        } else if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            match key.trim() {
                "Quorate" => quorate = Some(value.eq_ignore_ascii_case("yes")),
                "Quorum" => threshold = Some(leading_number(value)?),
                _ => {}
            }
        }
    }

    Some(QuorumSnapshot {
        quorate: quorate?,
        quorum_threshold: threshold?,
        nodes: nodes?,
    })
}

/// Normalize legacy `cman_tool status` + `cman_tool nodes` output
///
/// The two command outputs are concatenated with a `---Votes---`
/// marker between them; only `M` rows of the node table are online
/// members. Quoracy comes from the membership state line.
pub fn parse_cman_quorum_info(output: &str) -> Option<QuorumSnapshot> {
    let mut quorate = None;
    let mut threshold = None;
    let mut local_node_id = None::<String>;
    let mut nodes = None::<Vec<QuorumNode>>;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(list) = nodes.as_mut() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.first() == Some(&"Node") || line.starts_with('-') {
                continue;
            }
            if parts.len() < 4 {
                return None;
            }
            if parts[1] != "M" {
                continue;
            }
            list.push(QuorumNode {
                name: parts[3].to_string(),
                votes: parts[2].parse().ok()?,
                local: local_node_id.as_deref() == Some(parts[0]),
            });
        } else if line == "---Votes---" {
            nodes = Some(Vec::new());
        } else if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            match key.trim() {
                "Quorum" => threshold = Some(leading_number(value)?),
                "Membership state" => quorate = Some(value == "Cluster-Member"),
                "Quorate" => quorate = Some(value.eq_ignore_ascii_case("yes")),
                "Node ID" => local_node_id = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Some(QuorumSnapshot {
        quorate: quorate?,
        quorum_threshold: threshold?,
        nodes: nodes?,
    })
}
