//! Command plan for the legacy CMAN membership substrate
//!
//! The legacy substrate has no structured text configuration of its
//! own; membership is assembled by running an ordered sequence of
//! `ccs` invocations against a scratch file. This module only builds
//! the plan; executing it is the coordinator's job.

use crate::conf::NodeEntry;
use crate::options::ValidatedOptions;

/// One `ccs` invocation of the plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CcsCommand {
    pub args: Vec<String>,
    /// Message to surface when this step fails
    pub error_hint: String,
}

impl CcsCommand {
    fn new<const N: usize>(args: [&str; N], error_hint: impl Into<String>) -> Self {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            error_hint: error_hint.into(),
        }
    }

    fn from_vec(args: Vec<String>, error_hint: impl Into<String>) -> Self {
        Self {
            args,
            error_hint: error_hint.into(),
        }
    }
}

/// Build the ordered invocation sequence creating a CMAN cluster
pub fn build_cman_command_plan(
    cluster_name: &str,
    nodes: &[NodeEntry],
    options: &ValidatedOptions,
) -> Vec<CcsCommand> {
    let broadcast = options.transport.broadcast;
    let mut plan = Vec::new();

    plan.push(CcsCommand::new(
        ["-i", "--createcluster", cluster_name],
        format!("error creating cluster: {}", cluster_name),
    ));
    plan.push(CcsCommand::new(
        ["-i", "--addfencedev", "pcmk-redirect", "agent=fence_pcmk"],
        format!("error creating fence dev: {}", cluster_name),
    ));

    let mut cman_args = vec!["--setcman".to_string()];
    cman_args.push(format!("transport={}", options.transport.transport));
    cman_args.push(format!(
        "broadcast={}",
        if broadcast { "yes" } else { "no" }
    ));
    if nodes.len() == 2 {
        cman_args.push("two_node=1".to_string());
        cman_args.push("expected_votes=1".to_string());
    }
    plan.push(CcsCommand::from_vec(
        cman_args,
        "error setting cman options",
    ));

    for node in nodes {
        plan.push(CcsCommand::new(
            ["--addnode", &node.ring0_addr],
            format!("error adding node: {}", node.ring0_addr),
        ));
        if let Some(ring1) = &node.ring1_addr {
            plan.push(CcsCommand::new(
                ["--addalt", &node.ring0_addr, ring1],
                format!(
                    "error adding alternative address for node: {}",
                    node.ring0_addr
                ),
            ));
        }
        plan.push(CcsCommand::new(
            ["-i", "--addmethod", "pcmk-method", &node.ring0_addr],
            format!("error adding fence method: {}", node.ring0_addr),
        ));
        plan.push(CcsCommand::from_vec(
            vec![
                "-i".to_string(),
                "--addfenceinst".to_string(),
                "pcmk-redirect".to_string(),
                node.ring0_addr.clone(),
                "pcmk-method".to_string(),
                format!("port={}", node.ring0_addr),
            ],
            format!("error adding fence instance: {}", node.ring0_addr),
        ));
    }

    if !broadcast {
        for (ring_number, ring) in options.transport.rings.iter().enumerate() {
            let mut mcast_args = vec![if ring_number == 0 {
                "--setmulticast".to_string()
            } else {
                "--setaltmulticast".to_string()
            }];
            if let Some(mcastaddr) = &ring.mcastaddr {
                mcast_args.push(mcastaddr.clone());
            }
            if let Some(mcastport) = &ring.mcastport {
                mcast_args.push(format!("port={}", mcastport));
            }
            if let Some(ttl) = &ring.ttl {
                mcast_args.push(format!("ttl={}", ttl));
            }
            plan.push(CcsCommand::from_vec(
                mcast_args,
                format!("error adding ring{} settings", ring_number),
            ));
        }
    }

    let mut totem_args = vec!["--settotem".to_string()];
    for (name, value) in options.totem.entries() {
        totem_args.push(format!("{}={}", name, value));
    }
    if let Some(mode) = options.transport.rrp_mode {
        totem_args.push(format!("rrp_mode={}", mode));
    }
    if totem_args.len() > 1 {
        plan.push(CcsCommand::from_vec(
            totem_args,
            "error setting totem options",
        ));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{SetupOptionsInput, validate_cman_options};

    fn nodes(names: &[&str]) -> Vec<NodeEntry> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| NodeEntry {
                id: index as u32 + 1,
                ring0_addr: name.to_string(),
                ring1_addr: None,
            })
            .collect()
    }

    #[test]
    fn test_plan_starts_with_cluster_and_fence_device() {
        let (options, _) = validate_cman_options(&SetupOptionsInput::default(), false);
        let plan = build_cman_command_plan("demo", &nodes(&["a", "b", "c"]), &options);
        assert_eq!(plan[0].args, ["-i", "--createcluster", "demo"]);
        assert_eq!(
            plan[1].args,
            ["-i", "--addfencedev", "pcmk-redirect", "agent=fence_pcmk"]
        );
        assert_eq!(
            plan[2].args,
            ["--setcman", "transport=udp", "broadcast=no"]
        );
    }

    #[test]
    fn test_two_node_cman_options() {
        let (options, _) = validate_cman_options(&SetupOptionsInput::default(), false);
        let plan = build_cman_command_plan("demo", &nodes(&["a", "b"]), &options);
        assert_eq!(
            plan[2].args,
            [
                "--setcman",
                "transport=udp",
                "broadcast=no",
                "two_node=1",
                "expected_votes=1"
            ]
        );
    }

    #[test]
    fn test_per_node_fencing_steps() {
        let (options, _) = validate_cman_options(&SetupOptionsInput::default(), false);
        let plan = build_cman_command_plan("demo", &nodes(&["a"]), &options);
        let args: Vec<_> = plan.iter().map(|c| c.args.join(" ")).collect();
        assert!(args.contains(&"--addnode a".to_string()));
        assert!(args.contains(&"-i --addmethod pcmk-method a".to_string()));
        assert!(
            args.contains(&"-i --addfenceinst pcmk-redirect a pcmk-method port=a".to_string())
        );
    }

    #[test]
    fn test_alternative_address_step() {
        let (options, _) = validate_cman_options(&SetupOptionsInput::default(), false);
        let members = vec![NodeEntry {
            id: 1,
            ring0_addr: "a".to_string(),
            ring1_addr: Some("a-alt".to_string()),
        }];
        let plan = build_cman_command_plan("demo", &members, &options);
        assert!(plan.iter().any(|c| c.args == ["--addalt", "a", "a-alt"]));
    }

    #[test]
    fn test_multicast_and_totem_steps() {
        let input = SetupOptionsInput {
            ring_addr: [Some("10.0.1.0".to_string()), Some("10.0.2.0".to_string())],
            mcast_port: [Some("5405".to_string()), None],
            token: Some("3000".to_string()),
            ..SetupOptionsInput::default()
        };
        let (options, _) = validate_cman_options(&input, false);
        let plan = build_cman_command_plan("demo", &nodes(&["a", "b", "c"]), &options);
        let args: Vec<_> = plan.iter().map(|c| c.args.join(" ")).collect();
        assert!(args.contains(&"--setmulticast 239.255.1.1 port=5405".to_string()));
        assert!(args.contains(&"--setaltmulticast 239.255.2.1".to_string()));
        assert!(args.contains(&"--settotem token=3000".to_string()));
    }

    #[test]
    fn test_totem_step_omitted_when_empty() {
        let (options, _) = validate_cman_options(&SetupOptionsInput::default(), false);
        let plan = build_cman_command_plan("demo", &nodes(&["a", "b", "c"]), &options);
        assert!(!plan.iter().any(|c| c.args[0] == "--settotem"));
    }
}
