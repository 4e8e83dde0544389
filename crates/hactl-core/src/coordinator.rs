//! Membership coordinator
//!
//! The coordinator implements the top-level intents: setup, node
//! add/remove, fleet-wide start/stop/enable/disable, destroy and the
//! small passthrough operations around them. It owns no I/O of its
//! own; everything flows through the `RemoteNodeClient` and
//! `HostRuntime` contracts, which keeps every flow testable against
//! fakes. Each intent takes an explicit request struct, there is no
//! ambient option state.
//!
//! Safety rules enforced here:
//! - quorum is checked before any destructive stop or removal, and an
//!   undeterminable quorum state requires force, it is never assumed
//!   safe
//! - a node being removed is stopped first, while the remaining
//!   members still count its votes
//! - add/remove membership transactions succeed when at least one
//!   member accepts the update; zero acceptances abort with the
//!   per-node results
//! - destroy never fails, every step's error is swallowed so a
//!   partially broken cluster can still be torn down

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use hactl_common::{
    HactlError, NodeOperationResult, ReportItem, Severity, parse_multiring_node, raise_on_errors,
};
use hactl_corosync::{
    ClusterConfig, NodeEntry, QuorumSnapshot, RrpMode, SetupOptionsInput, StopScope,
    add_node_to_conf, build_cman_command_plan, conf_needs_ring1, conf_node_addresses,
    is_node_offline_in_output, parse_cman_quorum_info, parse_quorumtool_output,
    quorum_device_settings, remove_node_from_conf, validate_cman_options,
    validate_corosync_options, would_lose_quorum,
};

use crate::client::{BulkRequestKind, NodeError, PushStatus, RemoteNodeClient};
use crate::fanout::NodeFanout;
use crate::host::HostRuntime;
use crate::waiter::{ConvergenceWaiter, WaitOutcome};

const DEFAULT_WATCHDOG: &str = "/dev/watchdog";

/// Which nodes a fleet-wide operation targets
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FleetSelection {
    /// The local node only
    Local,
    /// Every node of the known membership
    All,
    /// An explicit node set
    Nodes(Vec<String>),
}

/// Options of a cluster setup
#[derive(Clone, Debug, Default)]
pub struct SetupRequest {
    pub cluster_name: String,
    /// Node specs of the form `ring0_addr[,ring1_addr]`
    pub nodes: Vec<String>,
    pub options: SetupOptionsInput,
    /// Configure the local node only instead of the whole fleet
    pub local: bool,
    pub force: bool,
    pub start: bool,
    pub enable: bool,
    pub wait: Option<Duration>,
}

/// Options of a fleet start
#[derive(Clone, Debug)]
pub struct StartRequest {
    pub selection: FleetSelection,
    pub wait: Option<Duration>,
}

/// Options of a fleet stop
#[derive(Clone, Debug)]
pub struct StopRequest {
    pub selection: FleetSelection,
    pub force: bool,
}

/// Options of a node addition
#[derive(Clone, Debug, Default)]
pub struct AddNodeRequest {
    /// Node spec of the form `ring0_addr[,ring1_addr]`
    pub node: String,
    pub force: bool,
    pub start: bool,
    pub enable: bool,
    pub wait: Option<Duration>,
    /// Watchdog device for the new node when the watchdog subsystem is active
    pub watchdog: Option<String>,
}

/// Options of a node removal
#[derive(Clone, Debug, Default)]
pub struct RemoveNodeRequest {
    pub node: String,
    pub force: bool,
}

/// Top-level orchestrator of the membership lifecycle
pub struct MembershipCoordinator {
    client: Arc<dyn RemoteNodeClient>,
    host: Arc<dyn HostRuntime>,
    fanout: NodeFanout,
}

impl MembershipCoordinator {
    pub fn new(client: Arc<dyn RemoteNodeClient>, host: Arc<dyn HostRuntime>) -> Self {
        Self::with_fanout(client, host, NodeFanout::default())
    }

    pub fn with_fanout(
        client: Arc<dyn RemoteNodeClient>,
        host: Arc<dyn HostRuntime>,
        fanout: NodeFanout,
    ) -> Self {
        Self {
            client,
            host,
            fanout,
        }
    }

    /// Primary addresses of the membership recorded in the local config
    pub async fn known_nodes(&self) -> Result<Vec<String>, HactlError> {
        let conf = self.host.read_corosync_conf().await?;
        conf_node_addresses(&conf)
    }

    // ----- setup ---------------------------------------------------------

    /// Create a new cluster from scratch
    pub async fn setup(&self, request: SetupRequest) -> Result<(), HactlError> {
        if request.nodes.is_empty() {
            return Err(HactlError::validation("no nodes specified"));
        }
        let mut node_addrs = Vec::with_capacity(request.nodes.len());
        for spec in &request.nodes {
            node_addrs.push(parse_multiring_node(spec)?);
        }
        let dual_ring = node_addrs.iter().any(|(_, ring1)| ring1.is_some());
        if dual_ring && node_addrs.iter().any(|(_, ring1)| ring1.is_none()) {
            return Err(HactlError::validation(
                "if one node is configured for RRP, all nodes must be configured for RRP",
            ));
        }

        let mut unresolvable = false;
        for (ring0, ring1) in &node_addrs {
            for addr in std::iter::once(ring0).chain(ring1.as_ref()) {
                if !self.host.resolve_address(addr).await {
                    warn!("unable to resolve hostname: {}", addr);
                    unresolvable = true;
                }
            }
        }
        if unresolvable && !request.force {
            return Err(HactlError::validation(
                "unable to resolve all hostnames, use --force to override",
            ));
        }

        let is_cman = self.host.is_cman().await;
        let (mut options, reports) = if is_cman {
            validate_cman_options(&request.options, request.force)
        } else {
            validate_corosync_options(&request.options, request.force)
        };
        if dual_ring && options.transport.rrp_mode.is_none() {
            options.transport.rrp_mode = Some(RrpMode::Passive);
        }
        surface_reports(&raise_on_errors(reports)?);

        let config = if is_cman {
            let entries: Vec<NodeEntry> = node_addrs
                .iter()
                .enumerate()
                .map(|(index, (ring0, ring1))| NodeEntry {
                    id: index as u32 + 1,
                    ring0_addr: ring0.clone(),
                    ring1_addr: ring1.clone(),
                })
                .collect();
            let plan = build_cman_command_plan(&request.cluster_name, &entries, &options);
            self.host.assemble_cman_conf(&plan).await?
        } else {
            ClusterConfig::build(&request.cluster_name, &node_addrs, options)?.render()
        };

        if request.local {
            self.setup_local(&request, &config).await
        } else {
            let primary: Vec<String> = node_addrs.iter().map(|(ring0, _)| ring0.clone()).collect();
            self.setup_fleet(&request, &primary, &config).await
        }
    }

    async fn setup_local(&self, request: &SetupRequest, config: &str) -> Result<(), HactlError> {
        if !request.force {
            if self.host.corosync_conf_exists().await {
                return Err(HactlError::validation(
                    "cluster configuration already exists, use --force to overwrite",
                ));
            }
            if self.host.cib_exists().await {
                return Err(HactlError::validation(
                    "resource database already exists, use --force to overwrite",
                ));
            }
        }
        self.destroy_local().await;
        self.host.write_corosync_conf(config).await?;
        if request.start {
            self.start_local().await?;
        }
        if request.enable {
            self.host.enable_cluster_services().await?;
        }
        if request.start
            && let Some(timeout) = request.wait
        {
            self.wait_local(timeout).await?;
        }
        Ok(())
    }

    async fn setup_fleet(
        &self,
        request: &SetupRequest,
        nodes: &[String],
        config: &str,
    ) -> Result<(), HactlError> {
        if !request.force {
            let availability = self
                .fanout
                .run(nodes, |node| {
                    let client = self.client.clone();
                    async move {
                        client
                            .node_available(&node)
                            .await
                            .map(|_| "available".to_string())
                    }
                })
                .await;
            if !availability.all_succeeded() {
                return Err(HactlError::Aggregate(availability.error_summary(
                    "nodes availability check failed, use --force to override. \
                     WARNING: this will destroy any existing cluster on the nodes",
                )));
            }
        }

        info!("Destroying cluster on nodes: {}...", nodes.join(", "));
        self.destroy_fleet(nodes, false).await?;

        // the daemons exchange their own configs before corosync starts;
        // failures here degrade cluster management, not the cluster itself
        info!("Sending cluster daemon configuration to the nodes...");
        self.distribute(
            nodes,
            BulkRequestKind::DaemonConfigs,
            serde_json::json!({ "force": true, "clear_local_cluster_permissions": true }),
        )
        .await;

        info!("Sending cluster configuration to the nodes...");
        self.push_config_fleet(nodes, config)
            .await
            .require_all("unable to distribute the cluster configuration")?;

        if request.start {
            info!("Starting cluster on nodes: {}...", nodes.join(", "));
            self.start_fleet(nodes).await?;
        }
        if request.enable {
            self.enable_fleet(nodes).await?;
        }

        // certificate sync restarts the daemons, it has to come last
        self.distribute(nodes, BulkRequestKind::CertSync, serde_json::json!({}))
            .await;

        if request.start
            && let Some(timeout) = request.wait
        {
            self.wait_fleet(nodes, timeout).await?;
        }
        Ok(())
    }

    // ----- node add / remove ---------------------------------------------

    /// Add a node to the running cluster
    pub async fn add_node(&self, request: AddNodeRequest) -> Result<(), HactlError> {
        let (node0, node1) = parse_multiring_node(&request.node)?;

        if let Err(e) = self.client.check_authorization(&node0).await {
            return Err(HactlError::communication(&node0, e.message));
        }

        let conf = self.host.read_corosync_conf().await?;
        let needs_ring1 = conf_needs_ring1(&conf)?;
        if needs_ring1 && node1.is_none() {
            return Err(HactlError::validation(
                "cluster is configured for RRP, you have to specify ring 1 address for the node",
            ));
        }
        if !needs_ring1 && node1.is_some() {
            return Err(HactlError::validation(
                "cluster is not configured for RRP, you must not specify ring 1 address for the node",
            ));
        }

        if let Err(e) = self.client.node_available(&node0).await {
            if request.force {
                warn!("unable to add '{}' to cluster: {}", node0, e.message);
            } else {
                return Err(HactlError::validation(format!(
                    "unable to add '{}' to cluster: {}, use --force to override",
                    node0, e.message
                )));
            }
        }

        self.sync_auxiliary_subsystems(&request, &node0).await;

        // every existing member must learn about the new node; the
        // transaction holds as long as at least one of them does
        let members = conf_node_addresses(&conf)?;
        let mut results = Vec::new();
        let mut updated_conf = None;
        for member in &members {
            match self
                .client
                .add_local_node(member, &node0, node1.as_deref())
                .await
            {
                Ok(conf) => {
                    info!("{}: corosync updated", member);
                    results.push(NodeOperationResult::success(member, "corosync updated"));
                    updated_conf = Some(conf);
                }
                Err(e) => {
                    warn!("unable to add {} on {}: {}", node0, member, e.message);
                    results.push(NodeOperationResult::failure(member, e.message));
                }
            }
        }

        // corosync must pick up the new member before that member starts
        if let Err(e) = self.host.reload_corosync().await {
            warn!("unable to reload corosync: {}", e);
        }

        let Some(updated_conf) = updated_conf else {
            return Err(HactlError::PartialTransaction(results));
        };

        let target = vec![node0.clone()];
        let statuses = self
            .client
            .send_bulk(
                &target,
                BulkRequestKind::DaemonConfigs,
                serde_json::json!({ "force": true }),
            )
            .await
            .map_err(|e| HactlError::communication(&node0, e.message))?;
        require_accepted(&node0, Ok(one_status(&statuses, &node0)))?;

        self.register_with_qdevice(&node0, &updated_conf).await;

        info!("Setting up corosync on {}...", node0);
        require_accepted(&node0, self.client.push_config(&node0, &updated_conf).await)?;

        if request.enable
            && let Err(e) = self.client.enable_cluster(&node0).await
        {
            warn!("enable cluster: {}", e.message);
        }
        let is_cman = self.host.is_cman().await;
        if request.start || is_cman {
            // a stopped new member would be fenced on the legacy substrate
            if let Err(e) = self.client.start_cluster(&node0).await {
                warn!("start cluster: {}", e.message);
            }
        }

        self.distribute(&target, BulkRequestKind::CertSync, serde_json::json!({}))
            .await;

        if (request.start || is_cman)
            && let Some(timeout) = request.wait
        {
            self.wait_fleet(&target, timeout).await?;
        }
        Ok(())
    }

    /// Remove a node from the running cluster
    pub async fn remove_node(&self, request: RemoveNodeRequest) -> Result<(), HactlError> {
        let (node0, _) = parse_multiring_node(&request.node)?;
        let members = self.known_nodes().await?;
        if !members.contains(&node0) {
            return Err(HactlError::validation(format!(
                "node '{}' does not appear to exist in configuration",
                node0
            )));
        }

        if !request.force {
            if let Err(e) = self.client.check_authorization(&node0).await {
                return Err(HactlError::communication(
                    &node0,
                    format!("{}, use --force to override", e.message),
                ));
            }
            self.check_remove_safety(&node0).await?;
        }

        // stop and tear the node down first, while every remaining member
        // still counts its votes; removing it from the membership lists
        // before it stopped could drop another member below quorum
        self.destroy_fleet(std::slice::from_ref(&node0), request.force)
            .await?;

        let mut results = Vec::new();
        let mut removed = false;
        for member in &members {
            if member == &node0 {
                continue;
            }
            match self.client.remove_local_node(member, &node0).await {
                Ok(()) => {
                    info!("{}: corosync updated", member);
                    results.push(NodeOperationResult::success(member, "corosync updated"));
                    removed = true;
                }
                Err(e) => {
                    warn!("unable to remove {} on {}: {}", node0, member, e.message);
                    results.push(NodeOperationResult::failure(member, e.message));
                }
            }
        }
        if !removed {
            return Err(HactlError::PartialTransaction(results));
        }

        if let Err(e) = self.host.reload_corosync().await {
            warn!("unable to reload corosync: {}", e);
        }
        // the resource manager keeps showing the node as offline until
        // its identity is evicted from the live membership view
        if let Err(e) = self.host.evict_node(&node0).await {
            warn!("{}", e);
        }
        Ok(())
    }

    // ----- fleet lifecycle ------------------------------------------------

    pub async fn start(&self, request: StartRequest) -> Result<(), HactlError> {
        match self.selection_nodes(&request.selection).await? {
            None => {
                self.start_local().await?;
                if let Some(timeout) = request.wait {
                    self.wait_local(timeout).await?;
                }
            }
            Some(nodes) => {
                info!("Starting cluster on nodes: {}...", nodes.join(", "));
                self.start_fleet(&nodes).await?;
                if let Some(timeout) = request.wait {
                    self.wait_fleet(&nodes, timeout).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn stop(&self, request: StopRequest) -> Result<(), HactlError> {
        match self.selection_nodes(&request.selection).await? {
            None => self.stop_local(request.force).await,
            Some(nodes) => self.stop_fleet(&nodes, request.force).await,
        }
    }

    pub async fn enable(&self, selection: FleetSelection) -> Result<(), HactlError> {
        match self.selection_nodes(&selection).await? {
            None => self.host.enable_cluster_services().await,
            Some(nodes) => self.enable_fleet(&nodes).await,
        }
    }

    pub async fn disable(&self, selection: FleetSelection) -> Result<(), HactlError> {
        match self.selection_nodes(&selection).await? {
            None => self.host.disable_cluster_services().await,
            Some(nodes) => {
                self.node_op(&nodes, "Disabled", |client, node| async move {
                    client.disable_cluster(&node).await
                })
                .await
                .require_all("unable to disable all nodes")
                .map(drop)
            }
        }
    }

    /// Tear down cluster state, locally or fleet-wide
    ///
    /// Local destroy never fails; its purpose is a clean slate even on
    /// a partially broken host.
    pub async fn destroy(&self, all: bool) -> Result<(), HactlError> {
        if all {
            let nodes = self.known_nodes().await?;
            self.destroy_fleet(&nodes, false).await
        } else {
            self.destroy_local().await;
            Ok(())
        }
    }

    /// SIGKILL every cluster daemon on the local node
    pub async fn kill(&self) {
        self.host.kill_cluster_daemons().await;
    }

    /// Tell the running membership layer to re-read its configuration
    pub async fn reload_corosync(&self) -> Result<(), HactlError> {
        self.host.reload_corosync().await.map(drop)
    }

    // ----- passthrough operations ----------------------------------------

    /// The transport configuration, local or fetched from a node
    pub async fn corosync_conf(&self, node: Option<&str>) -> Result<String, HactlError> {
        if self.host.is_cman().await {
            return Err(HactlError::validation(
                "corosync.conf is not supported on CMAN clusters",
            ));
        }
        match node {
            None => self.host.read_corosync_conf().await,
            Some(node) => self
                .client
                .fetch_config(node)
                .await
                .map_err(|e| HactlError::communication(node, e.message)),
        }
    }

    /// Add a node to the local membership list only
    ///
    /// This is the serving half of the add-node protocol: a member runs
    /// it when another node drives the cluster-wide addition.
    pub async fn localnode_add(&self, node: &str) -> Result<String, HactlError> {
        let (ring0, ring1) = parse_multiring_node(node)?;
        let conf = self.host.read_corosync_conf().await?;
        let updated = add_node_to_conf(&conf, &ring0, ring1.as_deref())?;
        self.host.write_corosync_conf(&updated).await?;
        info!("{}: successfully added", ring0);
        Ok(updated)
    }

    /// Remove a node from the local membership list only
    pub async fn localnode_remove(&self, node: &str) -> Result<String, HactlError> {
        let conf = self.host.read_corosync_conf().await?;
        let updated = remove_node_from_conf(&conf, node)?;
        self.host.write_corosync_conf(&updated).await?;
        info!("{}: successfully removed", node);
        Ok(updated)
    }

    /// Validate the resource manager configuration
    pub async fn verify(&self, cib_file: Option<&str>, verbose: bool) -> Result<String, HactlError> {
        let mut argv = vec!["crm_verify".to_string()];
        if verbose {
            argv.push("-V".to_string());
        }
        match cib_file {
            None => argv.push("--live-check".to_string()),
            Some(file) => {
                argv.push("--xml-file".to_string());
                argv.push(file.to_string());
            }
        }
        let output = self.host.run_tool(&argv).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(HactlError::Aggregate(output.stdout.trim().to_string()))
        }
    }

    /// Assemble a diagnostic report bundle
    pub async fn report(
        &self,
        dest: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<String, HactlError> {
        let mut argv = vec!["crm_report".to_string(), "-f".to_string()];
        match from {
            Some(from) => {
                argv.push(from.to_string());
                if let Some(to) = to {
                    argv.push("-t".to_string());
                    argv.push(to.to_string());
                }
            }
            None => {
                let yesterday = chrono::Local::now() - chrono::Duration::days(1);
                argv.push(yesterday.format("%Y-%m-%d %H:%M").to_string());
            }
        }
        argv.push(dest.to_string());
        let output = self.host.run_tool(&argv).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(HactlError::Aggregate(output.stdout.trim().to_string()))
        }
    }

    /// Authenticate against a node set, returning the tokens per node
    pub async fn auth(
        &self,
        nodes: &[String],
        username: &str,
        password: &str,
    ) -> Result<BTreeMap<String, String>, HactlError> {
        let username = username.to_string();
        let password = password.to_string();
        let report = self
            .fanout
            .run(nodes, |node| {
                let client = self.client.clone();
                let username = username.clone();
                let password = password.clone();
                async move { client.authenticate(&node, &username, &password).await }
            })
            .await
            .require_all("unable to authenticate all nodes")?;
        Ok(report
            .results
            .into_iter()
            .map(|result| (result.node, result.message))
            .collect())
    }

    // ----- building blocks -----------------------------------------------

    async fn selection_nodes(
        &self,
        selection: &FleetSelection,
    ) -> Result<Option<Vec<String>>, HactlError> {
        Ok(match selection {
            FleetSelection::Local => None,
            FleetSelection::All => Some(self.known_nodes().await?),
            FleetSelection::Nodes(nodes) => Some(nodes.clone()),
        })
    }

    async fn node_op<F, Fut>(
        &self,
        nodes: &[String],
        done: &'static str,
        op: F,
    ) -> crate::fanout::FanoutReport
    where
        F: Fn(Arc<dyn RemoteNodeClient>, String) -> Fut,
        Fut: std::future::Future<Output = Result<(), NodeError>>,
    {
        self.fanout
            .run(nodes, |node| {
                let fut = op(self.client.clone(), node);
                async move { fut.await.map(|_| done.to_string()) }
            })
            .await
    }

    async fn start_local(&self) -> Result<(), HactlError> {
        info!("Starting cluster...");
        if self.host.is_cman().await {
            self.host.start_service("cman").await?;
        } else {
            self.host.start_service("corosync").await?;
            if self.host.qdevice_active().await {
                self.host.start_service("corosync-qdevice").await?;
            }
        }
        self.host.start_service("pacemaker").await
    }

    async fn stop_local(&self, force: bool) -> Result<(), HactlError> {
        if !force {
            self.check_local_stop_safety().await?;
        }
        // resource manager first; some resources need quorum to stop
        info!("Stopping cluster (pacemaker)...");
        self.host.stop_service("pacemaker").await?;
        if self.host.is_cman().await {
            info!("Stopping cluster (cman)...");
            self.host.stop_service("cman").await?;
        } else {
            info!("Stopping cluster (corosync)...");
            if self.host.qdevice_active().await {
                self.host.stop_service("corosync-qdevice").await?;
            }
            self.host.stop_service("corosync").await?;
        }
        Ok(())
    }

    async fn start_fleet(&self, nodes: &[String]) -> Result<(), HactlError> {
        self.node_op(nodes, "Started", |client, node| async move {
            client.start_cluster(&node).await
        })
        .await
        .require_all("unable to start all nodes")
        .map(drop)
    }

    async fn stop_fleet(&self, nodes: &[String], force: bool) -> Result<(), HactlError> {
        let all_nodes = self.known_nodes().await?;
        let unknown: Vec<String> = nodes
            .iter()
            .filter(|node| !all_nodes.contains(node))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(HactlError::validation(format!(
                "nodes '{}' do not appear to exist in configuration",
                unknown.join("', '")
            )));
        }

        // stopping the whole membership cannot lose quorum relative to itself
        let stopping_all = all_nodes.iter().all(|node| nodes.contains(node));
        if !force && !stopping_all {
            self.check_fleet_stop_safety(nodes).await?;
        }

        info!("Stopping cluster on nodes: {}...", nodes.join(", "));
        self.node_op(nodes, "Stopped", |client, node| async move {
            client.stop_resource_manager(&node).await
        })
        .await
        .require_all("unable to stop all nodes")?;
        self.node_op(nodes, "Stopped", |client, node| async move {
            client.stop_membership_layer(&node).await
        })
        .await
        .require_all("unable to stop all nodes")
        .map(drop)
    }

    async fn enable_fleet(&self, nodes: &[String]) -> Result<(), HactlError> {
        self.node_op(nodes, "Enabled", |client, node| async move {
            client.enable_cluster(&node).await
        })
        .await
        .require_all("unable to enable all nodes")
        .map(drop)
    }

    async fn destroy_local(&self) {
        info!("Shutting down cluster services...");
        let _ = self.host.stop_service("pacemaker").await;
        let _ = self.host.stop_service("corosync-qdevice").await;
        let _ = self.host.stop_service("corosync").await;
        info!("Killing any remaining daemons...");
        self.host.kill_cluster_daemons().await;
        let _ = self.host.disable_cluster_services().await;
        info!("Removing all cluster configuration files...");
        self.host.purge_cluster_state().await;
        self.host.qdevice_teardown().await;
    }

    async fn destroy_fleet(&self, nodes: &[String], keep_going: bool) -> Result<(), HactlError> {
        // stop the resource managers while the cluster is still quorate;
        // destroy stops any remaining daemons, so errors here do not matter
        let _ = self
            .node_op(nodes, "Stopped", |client, node| async move {
                client.stop_resource_manager(&node).await
            })
            .await;
        let report = self
            .node_op(nodes, "Destroyed", |client, node| async move {
                client.destroy_cluster(&node).await
            })
            .await;
        if report.all_succeeded() {
            return Ok(());
        }
        if keep_going {
            warn!("{}", report.error_summary("unable to destroy cluster"));
            Ok(())
        } else {
            Err(HactlError::Aggregate(
                report.error_summary("unable to destroy cluster"),
            ))
        }
    }

    async fn push_config_fleet(&self, nodes: &[String], config: &str) -> crate::fanout::FanoutReport {
        let config = config.to_string();
        self.fanout
            .run(nodes, |node| {
                let client = self.client.clone();
                let config = config.clone();
                async move {
                    match client.push_config(&node, &config).await? {
                        PushStatus::Ok | PushStatus::NotSupported => Ok("Succeeded".to_string()),
                        PushStatus::NotAuthorized => Err(NodeError::fatal(
                            "unable to authenticate, try running 'hactl cluster auth'",
                        )),
                        PushStatus::Error(message) => Err(NodeError::fatal(message)),
                    }
                }
            })
            .await
    }

    /// Best-effort bulk distribution; every failure becomes a warning
    async fn distribute(&self, nodes: &[String], kind: BulkRequestKind, payload: serde_json::Value) {
        match self.client.send_bulk(nodes, kind, payload).await {
            Ok(statuses) => {
                for (node, status) in statuses {
                    match status {
                        PushStatus::Ok | PushStatus::NotSupported => {}
                        PushStatus::NotAuthorized => warn!(
                            "unable to authenticate to {}, try running 'hactl cluster auth'",
                            node
                        ),
                        PushStatus::Error(message) => {
                            warn!("unable to send configuration to {}: {}", node, message);
                        }
                    }
                }
            }
            Err(e) => warn!("unable to distribute configuration: {}", e),
        }
    }

    /// Watchdog and ticket-manager state for a joining node
    ///
    /// This is a best-effort signaling layer; the node joins the
    /// membership even when it fails, so everything is a warning.
    async fn sync_auxiliary_subsystems(&self, request: &AddNodeRequest, node: &str) {
        let target = vec![node.to_string()];
        if self.host.watchdog_active().await {
            let watchdog = match &request.watchdog {
                Some(watchdog) => watchdog.clone(),
                None => {
                    warn!("using default watchdog '{}'", DEFAULT_WATCHDOG);
                    DEFAULT_WATCHDOG.to_string()
                }
            };
            match self.host.watchdog_config().await {
                Ok(config) => {
                    self.distribute(
                        &target,
                        BulkRequestKind::WatchdogConfig,
                        serde_json::json!({
                            "config": config,
                            "watchdog": watchdog,
                            "enable": true,
                        }),
                    )
                    .await;
                }
                Err(e) => warn!("unable to read watchdog configuration: {}", e),
            }
        } else {
            self.distribute(
                &target,
                BulkRequestKind::WatchdogConfig,
                serde_json::json!({ "enable": false }),
            )
            .await;
        }
        self.distribute(
            &target,
            BulkRequestKind::TicketConfigs,
            serde_json::json!({ "force": request.force }),
        )
        .await;
    }

    /// Register a joining node with a network quorum device
    async fn register_with_qdevice(&self, node: &str, conf: &str) {
        if self.host.is_cman().await {
            return;
        }
        let Ok(Some((model, host))) = quorum_device_settings(conf) else {
            return;
        };
        if model != "net" {
            return;
        }
        let Some(host) = host else {
            warn!("quorum device of model net has no host configured");
            return;
        };
        let cluster_name = ClusterConfig::parse(conf)
            .map(|c| c.cluster_name)
            .unwrap_or_default();
        if let Err(e) = self
            .client
            .register_qdevice_certs(node, &host, &cluster_name)
            .await
        {
            warn!("unable to register {} with the quorum device: {}", node, e.message);
        }
    }

    async fn wait_local(&self, timeout: Duration) -> Result<(), HactlError> {
        info!("Waiting for the cluster to start...");
        let waiter = ConvergenceWaiter::new(Some(timeout));
        let host = self.host.clone();
        let outcome = waiter
            .wait(|| {
                let host = host.clone();
                async move { host.local_node_status().await }
            })
            .await;
        match outcome {
            WaitOutcome::Converged => Ok(()),
            WaitOutcome::TimedOut => Err(HactlError::Aggregate("waiting timeout".to_string())),
            WaitOutcome::Failed(message) => Err(HactlError::Aggregate(message)),
        }
    }

    async fn wait_fleet(&self, nodes: &[String], timeout: Duration) -> Result<(), HactlError> {
        info!("Waiting for node(s) to start...");
        let waiter = ConvergenceWaiter::new(Some(timeout));
        waiter
            .wait_nodes(&self.fanout, self.client.clone(), nodes)
            .await
            .require_all("unable to verify all nodes have started")
            .map(drop)
    }

    // ----- quorum safety --------------------------------------------------

    async fn parse_quorum_output(&self, output: &str) -> Option<QuorumSnapshot> {
        if self.host.is_cman().await {
            parse_cman_quorum_info(output)
        } else {
            parse_quorumtool_output(output)
        }
    }

    async fn check_local_stop_safety(&self) -> Result<(), HactlError> {
        let output = self.host.local_quorum_output().await?;
        match self.parse_quorum_output(&output).await {
            Some(info) => {
                if would_lose_quorum(&info, StopScope::Local) {
                    return Err(HactlError::QuorumSafety(
                        "stopping the node will cause a loss of the quorum, \
                         use --force to override"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            // the membership layer is already down, nothing left to lose
            None if is_node_offline_in_output(&output) => Ok(()),
            None => Err(HactlError::QuorumSafety(
                "unable to determine whether stopping the node will cause \
                 a loss of the quorum, use --force to override"
                    .to_string(),
            )),
        }
    }

    /// Ask the leaving nodes for quorum state until one gives a usable answer
    async fn check_fleet_stop_safety(&self, leaving: &[String]) -> Result<(), HactlError> {
        let mut errors = Vec::new();
        for node in leaving {
            let output = match self.client.quorum_status(node).await {
                Ok(output) => output,
                Err(e) => {
                    errors.push(format!("{}: {}", node, e.message));
                    continue;
                }
            };
            if let Some(info) = self.parse_quorum_output(&output).await {
                if !info.quorate {
                    // this member sees no quorum, it cannot lose one
                    continue;
                }
                if would_lose_quorum(&info, StopScope::Nodes(leaving)) {
                    return Err(HactlError::QuorumSafety(
                        "stopping the node(s) will cause a loss of the quorum, \
                         use --force to override"
                            .to_string(),
                    ));
                }
                return Ok(());
            }
            if !is_node_offline_in_output(&output) {
                errors.push(format!("{}: unable to get quorum status", node));
            }
            // an already stopped member casts no votes, ask the others
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HactlError::QuorumSafety(format!(
                "unable to determine whether stopping the nodes will cause \
                 a loss of the quorum, use --force to override\n{}",
                errors.join("\n")
            )))
        }
    }

    async fn check_remove_safety(&self, node: &str) -> Result<(), HactlError> {
        let undeterminable = |detail: &str| {
            HactlError::QuorumSafety(format!(
                "unable to determine whether removing the node will cause \
                 a loss of the quorum, use --force to override\n{}",
                detail
            ))
        };
        let output = match self.client.quorum_status(node).await {
            Ok(output) => output,
            Err(e) => return Err(undeterminable(&e.message)),
        };
        match self.parse_quorum_output(&output).await {
            Some(info) => {
                let leaving = vec![node.to_string()];
                if would_lose_quorum(&info, StopScope::Nodes(&leaving)) {
                    return Err(HactlError::QuorumSafety(
                        "removing the node will cause a loss of the quorum, \
                         use --force to override"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            // the node is already stopped, its votes are not counted
            None if is_node_offline_in_output(&output) => Ok(()),
            None => Err(undeterminable(output.trim())),
        }
    }
}

fn surface_reports(reports: &[ReportItem]) {
    for report in reports {
        match report.severity {
            Severity::Error | Severity::Warning => warn!("{}", report.message),
            Severity::Info => info!("{}", report.message),
        }
    }
}

fn one_status(statuses: &BTreeMap<String, PushStatus>, node: &str) -> PushStatus {
    statuses
        .get(node)
        .cloned()
        .unwrap_or_else(|| PushStatus::Error("no response".to_string()))
}

fn require_accepted(node: &str, result: Result<PushStatus, NodeError>) -> Result<(), HactlError> {
    match result {
        Ok(PushStatus::Ok) | Ok(PushStatus::NotSupported) => Ok(()),
        Ok(PushStatus::NotAuthorized) => Err(HactlError::communication(
            node,
            format!(
                "unable to authenticate to {}, try running 'hactl cluster auth'",
                node
            ),
        )),
        Ok(PushStatus::Error(message)) => Err(HactlError::communication(node, message)),
        Err(e) => Err(HactlError::communication(node, e.message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::client::NodeStatus;
    use crate::host::ToolOutput;
    use hactl_corosync::CcsCommand;

    const QUORATE_3_OF_3: &str = "\
Quorate:          Yes
Quorum:           2
Membership information
----------------------
    Nodeid      Votes    Name
         1          1    node-a (local)
         2          1    node-b
         3          1    node-c
";

    const QUORATE_2_OF_2: &str = "\
Quorate:          Yes
Quorum:           2
Membership information
----------------------
    Nodeid      Votes    Name
         1          1    node-a (local)
         2          1    node-b
";

    #[derive(Default)]
    struct FakeClient {
        log: Mutex<Vec<String>>,
        unavailable: HashSet<String>,
        unauthorized: HashSet<String>,
        refuse_membership_update: HashSet<String>,
        push_failures: HashSet<String>,
        quorum_output: String,
        updated_conf: String,
    }

    impl FakeClient {
        fn log(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteNodeClient for FakeClient {
        async fn authenticate(
            &self,
            node: &str,
            _username: &str,
            _password: &str,
        ) -> Result<String, NodeError> {
            self.log(format!("authenticate {}", node));
            Ok(format!("token-{}", node))
        }

        async fn check_authorization(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("check_authorization {}", node));
            if self.unauthorized.contains(node) {
                Err(NodeError::fatal(format!("{} is not yet authenticated", node)))
            } else {
                Ok(())
            }
        }

        async fn node_available(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("node_available {}", node));
            if self.unavailable.contains(node) {
                Err(NodeError::fatal("node is already in a cluster"))
            } else {
                Ok(())
            }
        }

        async fn push_config(&self, node: &str, _config: &str) -> Result<PushStatus, NodeError> {
            self.log(format!("push_config {}", node));
            if self.push_failures.contains(node) {
                Ok(PushStatus::Error("connection refused".to_string()))
            } else {
                Ok(PushStatus::Ok)
            }
        }

        async fn fetch_config(&self, node: &str) -> Result<String, NodeError> {
            self.log(format!("fetch_config {}", node));
            Ok(self.updated_conf.clone())
        }

        async fn node_status(&self, node: &str) -> Result<NodeStatus, NodeError> {
            self.log(format!("node_status {}", node));
            Ok(NodeStatus {
                online: true,
                pending: false,
            })
        }

        async fn quorum_status(&self, node: &str) -> Result<String, NodeError> {
            self.log(format!("quorum_status {}", node));
            Ok(self.quorum_output.clone())
        }

        async fn add_local_node(
            &self,
            node: &str,
            new_ring0: &str,
            _new_ring1: Option<&str>,
        ) -> Result<String, NodeError> {
            self.log(format!("add_local_node {} {}", node, new_ring0));
            if self.refuse_membership_update.contains(node) {
                Err(NodeError::retryable("unable to connect"))
            } else {
                Ok(self.updated_conf.clone())
            }
        }

        async fn remove_local_node(&self, node: &str, leaving: &str) -> Result<(), NodeError> {
            self.log(format!("remove_local_node {} {}", node, leaving));
            if self.refuse_membership_update.contains(node) {
                Err(NodeError::retryable("unable to connect"))
            } else {
                Ok(())
            }
        }

        async fn start_cluster(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("start_cluster {}", node));
            Ok(())
        }

        async fn stop_resource_manager(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("stop_resource_manager {}", node));
            Ok(())
        }

        async fn stop_membership_layer(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("stop_membership_layer {}", node));
            Ok(())
        }

        async fn enable_cluster(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("enable_cluster {}", node));
            Ok(())
        }

        async fn disable_cluster(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("disable_cluster {}", node));
            Ok(())
        }

        async fn destroy_cluster(&self, node: &str) -> Result<(), NodeError> {
            self.log(format!("destroy_cluster {}", node));
            Ok(())
        }

        async fn register_qdevice_certs(
            &self,
            node: &str,
            qdevice_host: &str,
            _cluster_name: &str,
        ) -> Result<(), NodeError> {
            self.log(format!("register_qdevice_certs {} {}", node, qdevice_host));
            Ok(())
        }

        async fn send_bulk(
            &self,
            nodes: &[String],
            kind: BulkRequestKind,
            _payload: serde_json::Value,
        ) -> Result<BTreeMap<String, PushStatus>, NodeError> {
            self.log(format!("send_bulk {:?} {}", kind, nodes.join(",")));
            Ok(nodes
                .iter()
                .map(|node| (node.clone(), PushStatus::Ok))
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeHost {
        log: Mutex<Vec<String>>,
        conf: Mutex<Option<String>>,
        cib_present: bool,
        failing_services: HashSet<String>,
        quorum_output: String,
        watchdog: bool,
    }

    impl FakeHost {
        fn with_conf(conf: &str) -> Self {
            Self {
                conf: Mutex::new(Some(conf.to_string())),
                ..Self::default()
            }
        }

        fn log(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostRuntime for FakeHost {
        async fn read_corosync_conf(&self) -> Result<String, HactlError> {
            self.conf
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| HactlError::validation("unable to read corosync.conf"))
        }

        async fn write_corosync_conf(&self, text: &str) -> Result<(), HactlError> {
            self.log("write_corosync_conf");
            *self.conf.lock().unwrap() = Some(text.to_string());
            Ok(())
        }

        async fn corosync_conf_exists(&self) -> bool {
            self.conf.lock().unwrap().is_some()
        }

        async fn cib_exists(&self) -> bool {
            self.cib_present
        }

        async fn purge_cluster_state(&self) {
            self.log("purge_cluster_state");
            *self.conf.lock().unwrap() = None;
        }

        async fn start_service(&self, service: &str) -> Result<(), HactlError> {
            self.log(format!("start {}", service));
            if self.failing_services.contains(service) {
                Err(HactlError::Aggregate(format!("unable to start {}", service)))
            } else {
                Ok(())
            }
        }

        async fn stop_service(&self, service: &str) -> Result<(), HactlError> {
            self.log(format!("stop {}", service));
            if self.failing_services.contains(service) {
                Err(HactlError::Aggregate(format!("unable to stop {}", service)))
            } else {
                Ok(())
            }
        }

        async fn enable_cluster_services(&self) -> Result<(), HactlError> {
            self.log("enable services");
            Ok(())
        }

        async fn disable_cluster_services(&self) -> Result<(), HactlError> {
            self.log("disable services");
            Ok(())
        }

        async fn kill_cluster_daemons(&self) {
            self.log("kill daemons");
        }

        async fn reload_corosync(&self) -> Result<String, HactlError> {
            self.log("reload corosync");
            Ok(String::new())
        }

        async fn local_node_status(&self) -> Result<NodeStatus, NodeError> {
            Ok(NodeStatus {
                online: true,
                pending: false,
            })
        }

        async fn local_quorum_output(&self) -> Result<String, HactlError> {
            Ok(self.quorum_output.clone())
        }

        async fn is_cman(&self) -> bool {
            false
        }

        async fn qdevice_active(&self) -> bool {
            false
        }

        async fn qdevice_teardown(&self) {
            self.log("qdevice teardown");
        }

        async fn watchdog_active(&self) -> bool {
            self.watchdog
        }

        async fn watchdog_config(&self) -> Result<String, HactlError> {
            Ok("SBD_DEVICE=/dev/watchdog".to_string())
        }

        async fn resolve_address(&self, _addr: &str) -> bool {
            true
        }

        async fn evict_node(&self, node: &str) -> Result<(), HactlError> {
            self.log(format!("evict {}", node));
            Ok(())
        }

        async fn assemble_cman_conf(&self, _plan: &[CcsCommand]) -> Result<String, HactlError> {
            self.log("assemble cman conf");
            Ok("<cluster/>".to_string())
        }

        async fn run_tool(&self, argv: &[String]) -> Result<ToolOutput, HactlError> {
            self.log(format!("run {}", argv.join(" ")));
            Ok(ToolOutput {
                stdout: String::new(),
                status: 0,
            })
        }
    }

    fn three_node_conf() -> String {
        let (options, _) = validate_corosync_options(&SetupOptionsInput::default(), false);
        ClusterConfig::build(
            "demo",
            &[
                ("node-a".to_string(), None),
                ("node-b".to_string(), None),
                ("node-c".to_string(), None),
            ],
            options,
        )
        .unwrap()
        .render()
    }

    fn coordinator(client: FakeClient, host: FakeHost) -> MembershipCoordinator {
        MembershipCoordinator::new(Arc::new(client), Arc::new(host))
    }

    fn setup_request(local: bool) -> SetupRequest {
        SetupRequest {
            cluster_name: "demo".to_string(),
            nodes: vec![
                "node-a".to_string(),
                "node-b".to_string(),
                "node-c".to_string(),
            ],
            local,
            ..SetupRequest::default()
        }
    }

    #[tokio::test]
    async fn test_local_setup_writes_conf_and_starts() {
        let host = Arc::new(FakeHost::default());
        let coordinator = MembershipCoordinator::new(
            Arc::new(FakeClient::default()),
            host.clone(),
        );
        let request = SetupRequest {
            start: true,
            ..setup_request(true)
        };
        coordinator.setup(request).await.unwrap();

        let conf = host.read_corosync_conf().await.unwrap();
        assert!(conf.contains("cluster_name: demo"));
        assert_eq!(conf_node_addresses(&conf).unwrap(), ["node-a", "node-b", "node-c"]);
        let entries = host.entries();
        assert!(entries.contains(&"start corosync".to_string()));
        assert!(entries.contains(&"start pacemaker".to_string()));
    }

    #[tokio::test]
    async fn test_local_setup_refuses_overwrite_without_force() {
        let host = FakeHost::with_conf("totem {\n}\n");
        let coordinator = coordinator(FakeClient::default(), host);
        let err = coordinator.setup(setup_request(true)).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_local_setup_rejects_mixed_ring_configuration() {
        let coordinator = coordinator(FakeClient::default(), FakeHost::default());
        let request = SetupRequest {
            nodes: vec!["node-a,node-a-alt".to_string(), "node-b".to_string()],
            ..setup_request(true)
        };
        let err = coordinator.setup(request).await.unwrap_err();
        assert!(err.to_string().contains("all nodes must be configured for RRP"));
    }

    #[tokio::test]
    async fn test_fleet_setup_aborts_when_a_node_is_unavailable() {
        let client = FakeClient {
            unavailable: ["node-b".to_string()].into(),
            ..FakeClient::default()
        };
        let coordinator = coordinator(client, FakeHost::default());
        let err = coordinator.setup(setup_request(false)).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("availability check failed"));
        assert!(message.contains("node-b"));
    }

    #[tokio::test]
    async fn test_fleet_setup_pushes_config_everywhere() {
        let client = Arc::new(FakeClient::default());
        let coordinator =
            MembershipCoordinator::new(client.clone(), Arc::new(FakeHost::default()));
        coordinator.setup(setup_request(false)).await.unwrap();

        let entries = client.entries();
        for node in ["node-a", "node-b", "node-c"] {
            assert!(entries.contains(&format!("destroy_cluster {}", node)));
            assert!(entries.contains(&format!("push_config {}", node)));
        }
    }

    #[tokio::test]
    async fn test_fleet_setup_aborts_on_push_failure() {
        let client = FakeClient {
            push_failures: ["node-c".to_string()].into(),
            ..FakeClient::default()
        };
        let coordinator = coordinator(client, FakeHost::default());
        let err = coordinator.setup(setup_request(false)).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unable to distribute the cluster configuration"));
        assert!(message.contains("node-c"));
    }

    #[tokio::test]
    async fn test_add_node_requires_matching_ring_posture() {
        let coordinator = coordinator(
            FakeClient::default(),
            FakeHost::with_conf(&three_node_conf()),
        );
        let err = coordinator
            .add_node(AddNodeRequest {
                node: "node-d,node-d-alt".to_string(),
                ..AddNodeRequest::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured for RRP"));
    }

    #[tokio::test]
    async fn test_add_node_fails_when_no_member_accepts() {
        let client = FakeClient {
            refuse_membership_update: [
                "node-a".to_string(),
                "node-b".to_string(),
                "node-c".to_string(),
            ]
            .into(),
            updated_conf: three_node_conf(),
            ..FakeClient::default()
        };
        let coordinator = coordinator(client, FakeHost::with_conf(&three_node_conf()));
        let err = coordinator
            .add_node(AddNodeRequest {
                node: "node-d".to_string(),
                ..AddNodeRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HactlError::PartialTransaction(ref results) if results.len() == 3));
    }

    #[tokio::test]
    async fn test_add_node_succeeds_with_one_acceptance() {
        let client = Arc::new(FakeClient {
            refuse_membership_update: ["node-a".to_string(), "node-c".to_string()].into(),
            updated_conf: three_node_conf(),
            ..FakeClient::default()
        });
        let coordinator = MembershipCoordinator::new(
            client.clone(),
            Arc::new(FakeHost::with_conf(&three_node_conf())),
        );
        coordinator
            .add_node(AddNodeRequest {
                node: "node-d".to_string(),
                ..AddNodeRequest::default()
            })
            .await
            .unwrap();

        let entries = client.entries();
        // the accepting member's configuration lands on the new node
        assert!(entries.contains(&"add_local_node node-b node-d".to_string()));
        assert!(entries.contains(&"push_config node-d".to_string()));
    }

    #[tokio::test]
    async fn test_remove_node_rejects_unknown_member() {
        let coordinator = coordinator(
            FakeClient::default(),
            FakeHost::with_conf(&three_node_conf()),
        );
        let err = coordinator
            .remove_node(RemoveNodeRequest {
                node: "node-x".to_string(),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not appear to exist"));
    }

    #[tokio::test]
    async fn test_remove_node_blocked_by_quorum_loss() {
        // two nodes with threshold two: removing either loses quorum
        let client = FakeClient {
            quorum_output: QUORATE_2_OF_2.to_string(),
            ..FakeClient::default()
        };
        let (options, _) = validate_corosync_options(&SetupOptionsInput::default(), false);
        let conf = ClusterConfig::build(
            "demo",
            &[("node-a".to_string(), None), ("node-b".to_string(), None)],
            options,
        )
        .unwrap()
        .render();
        let coordinator = coordinator(client, FakeHost::with_conf(&conf));
        let err = coordinator
            .remove_node(RemoveNodeRequest {
                node: "node-b".to_string(),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HactlError::QuorumSafety(_)));
    }

    #[tokio::test]
    async fn test_remove_node_stops_target_before_updating_members() {
        let client = Arc::new(FakeClient {
            quorum_output: QUORATE_3_OF_3.to_string(),
            ..FakeClient::default()
        });
        let host = Arc::new(FakeHost::with_conf(&three_node_conf()));
        let coordinator = MembershipCoordinator::new(client.clone(), host.clone());
        coordinator
            .remove_node(RemoveNodeRequest {
                node: "node-b".to_string(),
                force: false,
            })
            .await
            .unwrap();

        let entries = client.entries();
        let destroyed = entries
            .iter()
            .position(|e| e == "destroy_cluster node-b")
            .unwrap();
        let first_update = entries
            .iter()
            .position(|e| e.starts_with("remove_local_node"))
            .unwrap();
        assert!(destroyed < first_update);
        assert!(entries.contains(&"remove_local_node node-a node-b".to_string()));
        assert!(entries.contains(&"remove_local_node node-c node-b".to_string()));
        assert!(!entries.contains(&"remove_local_node node-b node-b".to_string()));
        assert!(host.entries().contains(&"evict node-b".to_string()));
    }

    #[tokio::test]
    async fn test_stop_rejects_nodes_outside_membership() {
        let coordinator = coordinator(
            FakeClient::default(),
            FakeHost::with_conf(&three_node_conf()),
        );
        let err = coordinator
            .stop(StopRequest {
                selection: FleetSelection::Nodes(vec!["node-x".to_string()]),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("do not appear to exist"));
    }

    #[tokio::test]
    async fn test_stop_blocked_when_quorum_would_be_lost() {
        let client = FakeClient {
            quorum_output: QUORATE_3_OF_3.to_string(),
            ..FakeClient::default()
        };
        let coordinator = coordinator(client, FakeHost::with_conf(&three_node_conf()));
        let err = coordinator
            .stop(StopRequest {
                selection: FleetSelection::Nodes(vec![
                    "node-b".to_string(),
                    "node-c".to_string(),
                ]),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HactlError::QuorumSafety(_)));
    }

    #[tokio::test]
    async fn test_stop_allows_single_node_of_three() {
        let client = Arc::new(FakeClient {
            quorum_output: QUORATE_3_OF_3.to_string(),
            ..FakeClient::default()
        });
        let coordinator = MembershipCoordinator::new(
            client.clone(),
            Arc::new(FakeHost::with_conf(&three_node_conf())),
        );
        coordinator
            .stop(StopRequest {
                selection: FleetSelection::Nodes(vec!["node-b".to_string()]),
                force: false,
            })
            .await
            .unwrap();
        let entries = client.entries();
        let rm = entries
            .iter()
            .position(|e| e == "stop_resource_manager node-b")
            .unwrap();
        let membership = entries
            .iter()
            .position(|e| e == "stop_membership_layer node-b")
            .unwrap();
        assert!(rm < membership);
    }

    #[tokio::test]
    async fn test_stopping_everyone_skips_the_quorum_check() {
        let client = Arc::new(FakeClient::default());
        let coordinator = MembershipCoordinator::new(
            client.clone(),
            Arc::new(FakeHost::with_conf(&three_node_conf())),
        );
        coordinator
            .stop(StopRequest {
                selection: FleetSelection::All,
                force: false,
            })
            .await
            .unwrap();
        assert!(
            !client
                .entries()
                .iter()
                .any(|e| e.starts_with("quorum_status"))
        );
    }

    #[tokio::test]
    async fn test_undeterminable_quorum_requires_force() {
        let client = FakeClient {
            quorum_output: "garbage".to_string(),
            ..FakeClient::default()
        };
        let coordinator = coordinator(client, FakeHost::with_conf(&three_node_conf()));
        let err = coordinator
            .stop(StopRequest {
                selection: FleetSelection::Nodes(vec!["node-b".to_string()]),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unable to determine"));
    }

    #[tokio::test]
    async fn test_local_stop_proceeds_when_already_offline() {
        let host = FakeHost {
            conf: Mutex::new(Some(three_node_conf())),
            quorum_output: "Cannot initialize QUORUM service\n".to_string(),
            ..FakeHost::default()
        };
        let coordinator = coordinator(FakeClient::default(), host);
        coordinator
            .stop(StopRequest {
                selection: FleetSelection::Local,
                force: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_destroy_local_never_fails() {
        let host = Arc::new(FakeHost {
            conf: Mutex::new(Some(three_node_conf())),
            failing_services: [
                "pacemaker".to_string(),
                "corosync".to_string(),
                "corosync-qdevice".to_string(),
            ]
            .into(),
            ..FakeHost::default()
        });
        let coordinator =
            MembershipCoordinator::new(Arc::new(FakeClient::default()), host.clone());
        coordinator.destroy(false).await.unwrap();
        let entries = host.entries();
        assert!(entries.contains(&"kill daemons".to_string()));
        assert!(entries.contains(&"purge_cluster_state".to_string()));
        assert!(!host.corosync_conf_exists().await);
    }

    #[tokio::test]
    async fn test_localnode_roundtrip() {
        let host = Arc::new(FakeHost::with_conf(&three_node_conf()));
        let coordinator =
            MembershipCoordinator::new(Arc::new(FakeClient::default()), host.clone());
        coordinator.localnode_add("node-d").await.unwrap();
        assert_eq!(
            coordinator.known_nodes().await.unwrap(),
            ["node-a", "node-b", "node-c", "node-d"]
        );
        coordinator.localnode_remove("node-d").await.unwrap();
        assert_eq!(
            coordinator.known_nodes().await.unwrap(),
            ["node-a", "node-b", "node-c"]
        );
    }

    #[tokio::test]
    async fn test_auth_collects_tokens_per_node() {
        let coordinator = coordinator(FakeClient::default(), FakeHost::default());
        let nodes = vec!["node-a".to_string(), "node-b".to_string()];
        let tokens = coordinator.auth(&nodes, "hacluster", "secret").await.unwrap();
        assert_eq!(tokens["node-a"], "token-node-a");
        assert_eq!(tokens["node-b"], "token-node-b");
    }
}
