//! Command tree and dispatch
//!
//! The clap derive tree below is a thin shell: each subcommand maps
//! onto one public coordinator operation and carries exactly the knobs
//! that operation takes. The coordinator API stays callable without
//! any of this.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use hactl_core::{
    AddNodeRequest, ConvergenceWaiter, FleetSelection, HttpNodeClient, MembershipCoordinator,
    NodeClientConfig, RemoveNodeRequest, SetupRequest, StartRequest, StopRequest, SystemdHost,
};
use hactl_corosync::SetupOptionsInput;

#[derive(Parser)]
#[command(name = "hactl", version, about = "HA cluster membership control plane")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage the cluster membership lifecycle
    #[command(subcommand)]
    Cluster(ClusterCommand),
}

#[derive(Subcommand)]
pub enum ClusterCommand {
    /// Create a cluster from a set of nodes
    Setup(SetupArgs),

    /// Start cluster services
    Start {
        /// Nodes to start; none means the local node
        nodes: Vec<String>,
        /// Start every node of the membership
        #[arg(long)]
        all: bool,
        /// Wait for the nodes to come online, optionally bounded in seconds
        #[arg(long, value_name = "SECONDS", num_args = 0..=1, require_equals = true)]
        wait: Option<Option<u64>>,
    },

    /// Stop cluster services
    Stop {
        /// Nodes to stop; none means the local node
        nodes: Vec<String>,
        /// Stop every node of the membership
        #[arg(long)]
        all: bool,
        /// Skip the quorum safety check
        #[arg(long)]
        force: bool,
    },

    /// Enable cluster services at boot
    Enable {
        nodes: Vec<String>,
        #[arg(long)]
        all: bool,
    },

    /// Disable cluster services at boot
    Disable {
        nodes: Vec<String>,
        #[arg(long)]
        all: bool,
    },

    /// Add or remove a cluster member
    #[command(subcommand)]
    Node(NodeCommand),

    /// Edit the local membership list only
    #[command(subcommand)]
    Localnode(LocalnodeCommand),

    /// Print the transport configuration, local or from a node
    Corosync {
        node: Option<String>,
    },

    /// Reload the running membership layer
    Reload {
        /// Subsystem to reload; only corosync is supported
        component: String,
    },

    /// SIGKILL every cluster daemon on the local node
    Kill,

    /// Tear down cluster state and configuration
    Destroy {
        /// Destroy every node of the membership
        #[arg(long)]
        all: bool,
    },

    /// Authenticate against cluster nodes
    Auth {
        /// Nodes to authenticate against; none means the known membership
        nodes: Vec<String>,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },

    /// Validate the resource manager configuration
    Verify {
        /// Check a configuration file instead of the live cluster
        file: Option<String>,
        #[arg(short = 'V', long)]
        verbose: bool,
    },

    /// Assemble a diagnostic report bundle
    Report {
        dest: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Args)]
pub struct SetupArgs {
    /// Name of the new cluster
    pub cluster_name: String,
    /// Node addresses of the form ring0_addr[,ring1_addr]
    #[arg(required = true)]
    pub nodes: Vec<String>,

    /// Configure the local node only
    #[arg(long)]
    pub local: bool,
    /// Override safety checks, destroying any existing cluster
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub enable: bool,
    /// Wait for the nodes to come online, optionally bounded in seconds
    #[arg(long, value_name = "SECONDS", num_args = 0..=1, require_equals = true)]
    pub wait: Option<Option<u64>>,

    /// Membership transport, udp or udpu
    #[arg(long)]
    pub transport: Option<String>,
    /// Redundant ring mode, passive or active
    #[arg(long)]
    pub rrpmode: Option<String>,
    #[arg(long)]
    pub ipv6: bool,
    /// Ring 0 network bind address, multicast transport only
    #[arg(long)]
    pub addr0: Option<String>,
    #[arg(long)]
    pub addr1: Option<String>,
    #[arg(long)]
    pub broadcast0: bool,
    #[arg(long)]
    pub broadcast1: bool,
    #[arg(long)]
    pub mcast0: Option<String>,
    #[arg(long)]
    pub mcast1: Option<String>,
    #[arg(long)]
    pub mcastport0: Option<String>,
    #[arg(long)]
    pub mcastport1: Option<String>,
    #[arg(long)]
    pub ttl0: Option<String>,
    #[arg(long)]
    pub ttl1: Option<String>,

    #[arg(long)]
    pub token: Option<String>,
    #[arg(long)]
    pub token_coefficient: Option<String>,
    #[arg(long)]
    pub join: Option<String>,
    #[arg(long)]
    pub consensus: Option<String>,
    #[arg(long)]
    pub miss_count_const: Option<String>,
    #[arg(long)]
    pub fail_recv_const: Option<String>,

    #[arg(long)]
    pub wait_for_all: Option<String>,
    #[arg(long)]
    pub auto_tie_breaker: Option<String>,
    #[arg(long)]
    pub last_man_standing: Option<String>,
    #[arg(long)]
    pub last_man_standing_window: Option<String>,
}

impl SetupArgs {
    fn options(&self) -> SetupOptionsInput {
        SetupOptionsInput {
            transport: self.transport.clone(),
            rrp_mode: self.rrpmode.clone(),
            ipv6: self.ipv6,
            ring_addr: [self.addr0.clone(), self.addr1.clone()],
            broadcast: [self.broadcast0, self.broadcast1],
            mcast_addr: [self.mcast0.clone(), self.mcast1.clone()],
            mcast_port: [self.mcastport0.clone(), self.mcastport1.clone()],
            ttl: [self.ttl0.clone(), self.ttl1.clone()],
            token: self.token.clone(),
            token_coefficient: self.token_coefficient.clone(),
            join: self.join.clone(),
            consensus: self.consensus.clone(),
            miss_count_const: self.miss_count_const.clone(),
            fail_recv_const: self.fail_recv_const.clone(),
            wait_for_all: self.wait_for_all.clone(),
            auto_tie_breaker: self.auto_tie_breaker.clone(),
            last_man_standing: self.last_man_standing.clone(),
            last_man_standing_window: self.last_man_standing_window.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum NodeCommand {
    /// Add a node to the running cluster
    Add {
        /// Node address of the form ring0_addr[,ring1_addr]
        node: String,
        #[arg(long)]
        start: bool,
        #[arg(long)]
        enable: bool,
        #[arg(long)]
        force: bool,
        /// Watchdog device for the new node
        #[arg(long)]
        watchdog: Option<String>,
        #[arg(long, value_name = "SECONDS", num_args = 0..=1, require_equals = true)]
        wait: Option<Option<u64>>,
    },
    /// Remove a node from the running cluster
    Remove {
        node: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum LocalnodeCommand {
    Add { node: String },
    Remove { node: String },
}

fn wait_timeout(wait: Option<Option<u64>>) -> Option<Duration> {
    wait.map(|secs| {
        secs.map(Duration::from_secs)
            .unwrap_or(ConvergenceWaiter::DEFAULT_TIMEOUT)
    })
}

fn selection(all: bool, nodes: Vec<String>) -> FleetSelection {
    if all {
        FleetSelection::All
    } else if nodes.is_empty() {
        FleetSelection::Local
    } else {
        FleetSelection::Nodes(nodes)
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = Arc::new(HttpNodeClient::new(NodeClientConfig::default())?);
    let host = Arc::new(SystemdHost::new());
    let coordinator = MembershipCoordinator::new(client, host);

    match cli.command {
        Command::Cluster(command) => cluster(command, &coordinator).await,
    }
}

async fn cluster(
    command: ClusterCommand,
    coordinator: &MembershipCoordinator,
) -> anyhow::Result<()> {
    match command {
        ClusterCommand::Setup(args) => {
            if args.wait.is_some() && !args.start {
                anyhow::bail!("--wait requires --start");
            }
            coordinator
                .setup(SetupRequest {
                    cluster_name: args.cluster_name.clone(),
                    nodes: args.nodes.clone(),
                    options: args.options(),
                    local: args.local,
                    force: args.force,
                    start: args.start,
                    enable: args.enable,
                    wait: wait_timeout(args.wait),
                })
                .await?;
        }
        ClusterCommand::Start { nodes, all, wait } => {
            coordinator
                .start(StartRequest {
                    selection: selection(all, nodes),
                    wait: wait_timeout(wait),
                })
                .await?;
        }
        ClusterCommand::Stop { nodes, all, force } => {
            coordinator
                .stop(StopRequest {
                    selection: selection(all, nodes),
                    force,
                })
                .await?;
        }
        ClusterCommand::Enable { nodes, all } => {
            coordinator.enable(selection(all, nodes)).await?;
        }
        ClusterCommand::Disable { nodes, all } => {
            coordinator.disable(selection(all, nodes)).await?;
        }
        ClusterCommand::Node(NodeCommand::Add {
            node,
            start,
            enable,
            force,
            watchdog,
            wait,
        }) => {
            if wait.is_some() && !start {
                anyhow::bail!("--wait requires --start");
            }
            coordinator
                .add_node(AddNodeRequest {
                    node,
                    force,
                    start,
                    enable,
                    wait: wait_timeout(wait),
                    watchdog,
                })
                .await?;
        }
        ClusterCommand::Node(NodeCommand::Remove { node, force }) => {
            coordinator
                .remove_node(RemoveNodeRequest { node, force })
                .await?;
        }
        ClusterCommand::Localnode(LocalnodeCommand::Add { node }) => {
            coordinator.localnode_add(&node).await?;
        }
        ClusterCommand::Localnode(LocalnodeCommand::Remove { node }) => {
            coordinator.localnode_remove(&node).await?;
        }
        ClusterCommand::Corosync { node } => {
            let conf = coordinator.corosync_conf(node.as_deref()).await?;
            print!("{conf}");
        }
        ClusterCommand::Reload { component } => {
            if component != "corosync" {
                anyhow::bail!("unknown component '{component}', only corosync can be reloaded");
            }
            coordinator.reload_corosync().await?;
            println!("Corosync reloaded");
        }
        ClusterCommand::Kill => {
            coordinator.kill().await;
        }
        ClusterCommand::Destroy { all } => {
            coordinator.destroy(all).await?;
        }
        ClusterCommand::Auth {
            nodes,
            username,
            password,
        } => {
            let nodes = if nodes.is_empty() {
                coordinator.known_nodes().await?
            } else {
                nodes
            };
            let tokens = coordinator.auth(&nodes, &username, &password).await?;
            for node in tokens.keys() {
                println!("{node}: Authorized");
            }
        }
        ClusterCommand::Verify { file, verbose } => {
            let output = coordinator.verify(file.as_deref(), verbose).await?;
            if !output.trim().is_empty() {
                println!("{}", output.trim_end());
            }
        }
        ClusterCommand::Report { dest, from, to } => {
            let output = coordinator
                .report(&dest, from.as_deref(), to.as_deref())
                .await?;
            if !output.trim().is_empty() {
                println!("{}", output.trim_end());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_tree_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_setup_parses_transport_options() {
        let cli = Cli::parse_from([
            "hactl",
            "cluster",
            "setup",
            "demo",
            "node-a",
            "node-b,node-b-alt",
            "--transport",
            "udp",
            "--addr0",
            "10.0.1.0",
            "--token",
            "3000",
            "--start",
            "--wait=120",
        ]);
        let Command::Cluster(ClusterCommand::Setup(args)) = cli.command else {
            panic!("expected setup");
        };
        assert_eq!(args.cluster_name, "demo");
        assert_eq!(args.nodes, ["node-a", "node-b,node-b-alt"]);
        assert_eq!(args.wait, Some(Some(120)));
        let options = args.options();
        assert_eq!(options.transport.as_deref(), Some("udp"));
        assert_eq!(options.ring_addr[0].as_deref(), Some("10.0.1.0"));
        assert_eq!(options.token.as_deref(), Some("3000"));
    }

    #[test]
    fn test_bare_wait_uses_default_timeout() {
        let cli = Cli::parse_from(["hactl", "cluster", "start", "--all", "--wait"]);
        let Command::Cluster(ClusterCommand::Start { wait, all, .. }) = cli.command else {
            panic!("expected start");
        };
        assert!(all);
        assert_eq!(wait, Some(None));
        assert_eq!(wait_timeout(wait), Some(ConvergenceWaiter::DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_selection_mapping() {
        assert_eq!(selection(true, vec![]), FleetSelection::All);
        assert_eq!(selection(false, vec![]), FleetSelection::Local);
        assert_eq!(
            selection(false, vec!["node-a".to_string()]),
            FleetSelection::Nodes(vec!["node-a".to_string()])
        );
    }
}
