//! Remote node client contract and HTTP implementation
//!
//! Every per-node interaction of the coordinator goes through the
//! `RemoteNodeClient` trait, so the orchestration logic never knows how
//! nodes are reached. The production implementation talks to the
//! cluster daemon each node runs on port 2224.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Classification of a per-node communication failure
///
/// Retryable failures may heal on their own (the node is still
/// booting, a transient network error); fatal ones cannot (bad
/// credentials, permission denied, malformed responses) and polling
/// loops give up on them immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeErrorKind {
    Retryable,
    Fatal,
}

#[derive(thiserror::Error, Clone, Debug)]
#[error("{message}")]
pub struct NodeError {
    pub kind: NodeErrorKind,
    pub message: String,
}

impl NodeError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == NodeErrorKind::Fatal
    }
}

/// Lifecycle state of a node as reported by its daemon
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub online: bool,
    pub pending: bool,
}

impl NodeStatus {
    /// A node has converged when it is online and no longer joining
    pub fn converged(&self) -> bool {
        self.online && !self.pending
    }
}

/// Outcome of pushing configuration to a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushStatus {
    Ok,
    /// The node runs an older daemon without this endpoint
    NotSupported,
    NotAuthorized,
    Error(String),
}

impl PushStatus {
    /// Not-supported responses still count as acceptance: the node
    /// took the configuration through its fallback path.
    pub fn accepted(&self) -> bool {
        matches!(self, PushStatus::Ok | PushStatus::NotSupported)
    }
}

/// Kinds of bulk distribution requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkRequestKind {
    /// Cluster daemon configuration files
    DaemonConfigs,
    /// Daemon TLS certificates, restarts the receiving daemon
    CertSync,
    /// Watchdog device configuration
    WatchdogConfig,
    /// Ticket manager configuration files
    TicketConfigs,
}

impl BulkRequestKind {
    fn endpoint(&self) -> &'static str {
        match self {
            BulkRequestKind::DaemonConfigs => "set_configs",
            BulkRequestKind::CertSync => "set_certs",
            BulkRequestKind::WatchdogConfig => "set_sbd_config",
            BulkRequestKind::TicketConfigs => "booth_set_config",
        }
    }
}

/// Per-node communication used by the membership coordinator
#[async_trait]
pub trait RemoteNodeClient: Send + Sync {
    /// Exchange credentials for an access token
    async fn authenticate(
        &self,
        node: &str,
        username: &str,
        password: &str,
    ) -> Result<String, NodeError>;

    /// Check that this host is authorized against the node
    async fn check_authorization(&self, node: &str) -> Result<(), NodeError>;

    /// Check that the node is reachable and not part of a cluster
    async fn node_available(&self, node: &str) -> Result<(), NodeError>;

    /// Push the transport configuration to the node
    async fn push_config(&self, node: &str, config: &str) -> Result<PushStatus, NodeError>;

    /// Fetch the transport configuration from the node
    async fn fetch_config(&self, node: &str) -> Result<String, NodeError>;

    /// Query the node's lifecycle status
    async fn node_status(&self, node: &str) -> Result<NodeStatus, NodeError>;

    /// Fetch the raw quorum tool output from the node
    async fn quorum_status(&self, node: &str) -> Result<String, NodeError>;

    /// Ask a member to add a node to its membership list
    ///
    /// Returns the member's regenerated configuration on acceptance.
    async fn add_local_node(
        &self,
        node: &str,
        new_ring0: &str,
        new_ring1: Option<&str>,
    ) -> Result<String, NodeError>;

    /// Ask a member to remove a node from its membership list
    async fn remove_local_node(&self, node: &str, leaving: &str) -> Result<(), NodeError>;

    async fn start_cluster(&self, node: &str) -> Result<(), NodeError>;

    /// Stop the resource manager only, keeping membership votes alive
    async fn stop_resource_manager(&self, node: &str) -> Result<(), NodeError>;

    /// Stop the membership layer, dropping the node's votes
    async fn stop_membership_layer(&self, node: &str) -> Result<(), NodeError>;

    async fn enable_cluster(&self, node: &str) -> Result<(), NodeError>;

    async fn disable_cluster(&self, node: &str) -> Result<(), NodeError>;

    /// Tear down all cluster state on the node
    async fn destroy_cluster(&self, node: &str) -> Result<(), NodeError>;

    /// Register a node with a network quorum device
    async fn register_qdevice_certs(
        &self,
        node: &str,
        qdevice_host: &str,
        cluster_name: &str,
    ) -> Result<(), NodeError>;

    /// Distribute auxiliary configuration to a set of nodes
    async fn send_bulk(
        &self,
        nodes: &[String],
        kind: BulkRequestKind,
        payload: serde_json::Value,
    ) -> Result<BTreeMap<String, PushStatus>, NodeError>;
}

/// Configuration for the HTTP node client
#[derive(Clone, Debug)]
pub struct NodeClientConfig {
    /// Port the per-node daemon listens on
    pub port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self {
            port: 2224,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP implementation of the node client
///
/// Talks to the cluster daemon on every node. Auth failures and
/// malformed responses are fatal; connection problems are retryable
/// because the daemon may simply not be up yet.
pub struct HttpNodeClient {
    config: NodeClientConfig,
    http: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new(config: NodeClientConfig) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| NodeError::fatal(format!("unable to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    fn url(&self, node: &str, path: &str) -> String {
        let (host, port) = hactl_common::split_host_port(node);
        format!(
            "https://{}:{}/remote/{}",
            host,
            port.unwrap_or(self.config.port),
            path
        )
    }

    async fn post(
        &self,
        node: &str,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<String, NodeError> {
        let url = self.url(node, path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(node, response).await
    }

    async fn get(&self, node: &str, path: &str) -> Result<String, NodeError> {
        let url = self.url(node, path);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await.map_err(transport_error)?;
        read_response(node, response).await
    }
}

fn transport_error(error: reqwest::Error) -> NodeError {
    if error.is_connect() || error.is_timeout() {
        NodeError::retryable(format!("unable to connect: {}", error))
    } else {
        NodeError::fatal(error.to_string())
    }
}

async fn read_response(node: &str, response: reqwest::Response) -> Result<String, NodeError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| NodeError::retryable(format!("unable to read response: {}", e)))?;
    match status.as_u16() {
        200..=299 => Ok(body),
        401 => Err(NodeError::fatal(format!(
            "Unable to authenticate to {}, try running 'hactl cluster auth'",
            node
        ))),
        403 => Err(NodeError::fatal(format!("{}: Permission denied", node))),
        code => Err(NodeError::fatal(format!("HTTP error: {}", code))),
    }
}

fn push_status_from_response(result: Result<String, NodeError>) -> Result<PushStatus, NodeError> {
    match result {
        Ok(_) => Ok(PushStatus::Ok),
        Err(e) if e.kind == NodeErrorKind::Fatal && e.message.contains("HTTP error: 404") => {
            Ok(PushStatus::NotSupported)
        }
        Err(e) if e.message.contains("Unable to authenticate") => Ok(PushStatus::NotAuthorized),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl RemoteNodeClient for HttpNodeClient {
    async fn authenticate(
        &self,
        node: &str,
        username: &str,
        password: &str,
    ) -> Result<String, NodeError> {
        let body = self
            .post(node, "auth", &[("username", username), ("password", password)])
            .await?;
        let token = body.trim();
        if token.is_empty() {
            return Err(NodeError::fatal(format!(
                "{}: Username and/or password is incorrect",
                node
            )));
        }
        Ok(token.to_string())
    }

    async fn check_authorization(&self, node: &str) -> Result<(), NodeError> {
        self.get(node, "check_auth").await.map(drop)
    }

    async fn node_available(&self, node: &str) -> Result<(), NodeError> {
        let body = self.get(node, "node_available").await?;
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|_| NodeError::fatal("unable to parse node availability response"))?;
        if value["node_available"].as_bool() == Some(true) {
            Ok(())
        } else {
            Err(NodeError::fatal(
                "node is already in a cluster or running cluster services",
            ))
        }
    }

    async fn push_config(&self, node: &str, config: &str) -> Result<PushStatus, NodeError> {
        push_status_from_response(
            self.post(node, "set_corosync_conf", &[("corosync_conf", config)])
                .await,
        )
    }

    async fn fetch_config(&self, node: &str) -> Result<String, NodeError> {
        self.get(node, "get_corosync_conf").await
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatus, NodeError> {
        let body = self.get(node, "pacemaker_node_status").await?;
        // a malformed payload will not fix itself by polling again
        serde_json::from_str(&body).map_err(|_| NodeError::fatal("Unable to get node status"))
    }

    async fn quorum_status(&self, node: &str) -> Result<String, NodeError> {
        self.get(node, "get_quorum_info").await
    }

    async fn add_local_node(
        &self,
        node: &str,
        new_ring0: &str,
        new_ring1: Option<&str>,
    ) -> Result<String, NodeError> {
        let mut form = vec![("new_nodename", new_ring0)];
        if let Some(ring1) = new_ring1 {
            form.push(("new_ring1addr", ring1));
        }
        self.post(node, "add_node", &form).await
    }

    async fn remove_local_node(&self, node: &str, leaving: &str) -> Result<(), NodeError> {
        self.post(node, "remove_node", &[("remove_nodename", leaving)])
            .await
            .map(drop)
    }

    async fn start_cluster(&self, node: &str) -> Result<(), NodeError> {
        self.post(node, "cluster_start", &[]).await.map(drop)
    }

    async fn stop_resource_manager(&self, node: &str) -> Result<(), NodeError> {
        self.post(node, "cluster_stop", &[("component", "pacemaker")])
            .await
            .map(drop)
    }

    async fn stop_membership_layer(&self, node: &str) -> Result<(), NodeError> {
        self.post(node, "cluster_stop", &[("component", "corosync")])
            .await
            .map(drop)
    }

    async fn enable_cluster(&self, node: &str) -> Result<(), NodeError> {
        self.post(node, "cluster_enable", &[]).await.map(drop)
    }

    async fn disable_cluster(&self, node: &str) -> Result<(), NodeError> {
        self.post(node, "cluster_disable", &[]).await.map(drop)
    }

    async fn destroy_cluster(&self, node: &str) -> Result<(), NodeError> {
        self.post(node, "cluster_destroy", &[]).await.map(drop)
    }

    async fn register_qdevice_certs(
        &self,
        node: &str,
        qdevice_host: &str,
        cluster_name: &str,
    ) -> Result<(), NodeError> {
        self.post(
            node,
            "qdevice_net_client_init_certs",
            &[("qdevice_host", qdevice_host), ("cluster_name", cluster_name)],
        )
        .await
        .map(drop)
    }

    async fn send_bulk(
        &self,
        nodes: &[String],
        kind: BulkRequestKind,
        payload: serde_json::Value,
    ) -> Result<BTreeMap<String, PushStatus>, NodeError> {
        let body = payload.to_string();
        let mut statuses = BTreeMap::new();
        for node in nodes {
            let result =
                push_status_from_response(self.post(node, kind.endpoint(), &[("data", &body)]).await);
            let status = match result {
                Ok(status) => status,
                Err(e) => PushStatus::Error(e.message),
            };
            statuses.insert(node.clone(), status);
        }
        Ok(statuses)
    }
}
