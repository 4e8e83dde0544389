//! Local host contract and systemd implementation
//!
//! Everything the coordinator does to the machine it runs on goes
//! through `HostRuntime`: configuration persistence, service control,
//! membership layer reloads and status probes. Keeping this behind a
//! trait keeps the orchestration logic runnable against a fake host.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use hactl_common::HactlError;
use hactl_corosync::{CcsCommand, quorum_device_settings};

use crate::client::{NodeError, NodeStatus};

/// Output of an external tool invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub status: i32,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Local machine operations used by the membership coordinator
#[async_trait]
pub trait HostRuntime: Send + Sync {
    async fn read_corosync_conf(&self) -> Result<String, HactlError>;

    async fn write_corosync_conf(&self, text: &str) -> Result<(), HactlError>;

    async fn corosync_conf_exists(&self) -> bool;

    /// Whether a persisted resource database exists
    async fn cib_exists(&self) -> bool;

    /// Delete the transport configuration and persisted state files
    async fn purge_cluster_state(&self);

    async fn start_service(&self, service: &str) -> Result<(), HactlError>;

    async fn stop_service(&self, service: &str) -> Result<(), HactlError>;

    async fn enable_cluster_services(&self) -> Result<(), HactlError>;

    async fn disable_cluster_services(&self) -> Result<(), HactlError>;

    /// SIGKILL any remaining cluster daemons
    async fn kill_cluster_daemons(&self);

    /// Tell the running membership layer to re-read its configuration
    async fn reload_corosync(&self) -> Result<String, HactlError>;

    async fn local_node_status(&self) -> Result<NodeStatus, NodeError>;

    /// Raw quorum tool output for the local node
    async fn local_quorum_output(&self) -> Result<String, HactlError>;

    /// Whether this host runs the legacy membership substrate
    async fn is_cman(&self) -> bool;

    /// Whether a quorum device service is configured on this host
    async fn qdevice_active(&self) -> bool;

    /// Best-effort removal of local quorum device state
    async fn qdevice_teardown(&self);

    /// Whether the watchdog subsystem is enabled on this host
    async fn watchdog_active(&self) -> bool;

    /// Local watchdog subsystem configuration
    async fn watchdog_config(&self) -> Result<String, HactlError>;

    async fn resolve_address(&self, addr: &str) -> bool;

    /// Forcibly remove a node from the resource manager membership
    async fn evict_node(&self, node: &str) -> Result<(), HactlError>;

    /// Assemble a legacy substrate configuration by running a command plan
    async fn assemble_cman_conf(&self, plan: &[CcsCommand]) -> Result<String, HactlError>;

    /// Run an arbitrary external tool
    async fn run_tool(&self, argv: &[String]) -> Result<ToolOutput, HactlError>;
}

/// Filesystem locations used by the systemd host
#[derive(Clone, Debug)]
pub struct HostPaths {
    pub corosync_conf: PathBuf,
    pub cluster_conf: PathBuf,
    pub cib_dir: PathBuf,
    pub state_dirs: Vec<PathBuf>,
    pub qdevice_state_dir: PathBuf,
    pub watchdog_config: PathBuf,
    pub platform_release: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            corosync_conf: PathBuf::from("/etc/corosync/corosync.conf"),
            cluster_conf: PathBuf::from("/etc/cluster/cluster.conf"),
            cib_dir: PathBuf::from("/var/lib/pacemaker/cib"),
            state_dirs: vec![
                PathBuf::from("/var/lib/pacemaker"),
                PathBuf::from("/var/lib/corosync"),
                PathBuf::from("/var/lib/heartbeat"),
            ],
            qdevice_state_dir: PathBuf::from("/etc/corosync/qdevice/net"),
            watchdog_config: PathBuf::from("/etc/sysconfig/sbd"),
            platform_release: PathBuf::from("/etc/system-release"),
        }
    }
}

const CLUSTER_DAEMONS: &[&str] = &[
    "crmd",
    "pengine",
    "attrd",
    "lrmd",
    "stonithd",
    "cib",
    "pacemakerd",
    "pacemaker_remoted",
    "corosync-qdevice",
    "corosync",
];

/// File name prefixes of persisted cluster state
const STATE_FILE_PREFIXES: &[&str] = &["cib", "core.", "hostcache", "cts.", "pe"];

/// `HostRuntime` implementation driving systemd services and the
/// cluster command line tools
pub struct SystemdHost {
    paths: HostPaths,
}

impl SystemdHost {
    pub fn new() -> Self {
        Self::with_paths(HostPaths::default())
    }

    pub fn with_paths(paths: HostPaths) -> Self {
        Self { paths }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput, HactlError> {
        debug!("running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                HactlError::Aggregate(format!("unable to run {}: {}", program, e))
            })?;
        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        stdout.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ToolOutput {
            stdout,
            status: output.status.code().unwrap_or(-1),
        })
    }

    async fn service(&self, service: &str, action: &str) -> Result<(), HactlError> {
        let output = self.run("systemctl", &[action, service]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(HactlError::Aggregate(format!(
                "unable to {} {}: {}",
                action,
                service,
                output.stdout.trim()
            )))
        }
    }

    async fn remove_state_files(&self, dir: &Path) {
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if STATE_FILE_PREFIXES.iter().any(|p| name.starts_with(p)) {
                let path = entry.path();
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    let _ = tokio::fs::remove_dir_all(&path).await;
                } else {
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
    }
}

impl Default for SystemdHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostRuntime for SystemdHost {
    async fn read_corosync_conf(&self) -> Result<String, HactlError> {
        tokio::fs::read_to_string(&self.paths.corosync_conf)
            .await
            .map_err(|e| {
                HactlError::validation(format!(
                    "unable to read {}: {}",
                    self.paths.corosync_conf.display(),
                    e
                ))
            })
    }

    async fn write_corosync_conf(&self, text: &str) -> Result<(), HactlError> {
        if let Some(parent) = self.paths.corosync_conf.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(HactlError::ConfigWrite)?;
        }
        tokio::fs::write(&self.paths.corosync_conf, text)
            .await
            .map_err(HactlError::ConfigWrite)
    }

    async fn corosync_conf_exists(&self) -> bool {
        if self.is_cman().await {
            self.paths.cluster_conf.exists()
        } else {
            self.paths.corosync_conf.exists()
        }
    }

    async fn cib_exists(&self) -> bool {
        self.paths.cib_dir.join("cib.xml").exists()
    }

    async fn purge_cluster_state(&self) {
        let _ = tokio::fs::remove_file(&self.paths.corosync_conf).await;
        let _ = tokio::fs::remove_file(&self.paths.cluster_conf).await;
        for dir in &self.paths.state_dirs {
            self.remove_state_files(dir).await;
            self.remove_state_files(&dir.join("cib")).await;
            self.remove_state_files(&dir.join("pengine")).await;
        }
    }

    async fn start_service(&self, service: &str) -> Result<(), HactlError> {
        self.service(service, "start").await
    }

    async fn stop_service(&self, service: &str) -> Result<(), HactlError> {
        self.service(service, "stop").await
    }

    async fn enable_cluster_services(&self) -> Result<(), HactlError> {
        let services: &[&str] = if self.is_cman().await {
            &["cman", "pacemaker"]
        } else {
            &["corosync", "pacemaker"]
        };
        for service in services {
            self.service(service, "enable").await?;
        }
        Ok(())
    }

    async fn disable_cluster_services(&self) -> Result<(), HactlError> {
        let services: &[&str] = if self.is_cman().await {
            &["pacemaker", "cman"]
        } else {
            &["pacemaker", "corosync"]
        };
        for service in services {
            self.service(service, "disable").await?;
        }
        Ok(())
    }

    async fn kill_cluster_daemons(&self) {
        let mut args = vec!["-q", "-9"];
        args.extend(CLUSTER_DAEMONS.iter().copied());
        let _ = self.run("killall", &args).await;
    }

    async fn reload_corosync(&self) -> Result<String, HactlError> {
        let output = self.run("corosync-cfgtool", &["-R"]).await?;
        if !output.success() || output.stdout.contains("invalid option") {
            return Err(HactlError::Aggregate(output.stdout.trim().to_string()));
        }
        Ok(output.stdout)
    }

    async fn local_node_status(&self) -> Result<NodeStatus, NodeError> {
        let output = self
            .run("crm_mon", &["--one-shot", "--simple-status"])
            .await
            .map_err(|e| NodeError::retryable(e.to_string()))?;
        if !output.success() {
            return Err(NodeError::retryable(format!(
                "unable to get node status: {}",
                output.stdout.trim()
            )));
        }
        Ok(NodeStatus {
            online: true,
            pending: output.stdout.contains("pending"),
        })
    }

    async fn local_quorum_output(&self) -> Result<String, HactlError> {
        if self.is_cman().await {
            let status = self.run("cman_tool", &["status"]).await?;
            let nodes = self
                .run("cman_tool", &["nodes", "-F", "id,type,votes,name"])
                .await?;
            if status.stdout == nodes.stdout {
                // both commands failed the same way, do not duplicate it
                Ok(status.stdout)
            } else {
                Ok(format!("{}\n---Votes---\n{}", status.stdout, nodes.stdout))
            }
        } else {
            let output = self.run("corosync-quorumtool", &["-p", "-s"]).await?;
            Ok(output.stdout)
        }
    }

    async fn is_cman(&self) -> bool {
        match std::fs::read_to_string(&self.paths.platform_release) {
            Ok(release) => release.contains("release 6"),
            Err(_) => false,
        }
    }

    async fn qdevice_active(&self) -> bool {
        if self.is_cman().await {
            return false;
        }
        match self.read_corosync_conf().await {
            Ok(conf) => matches!(quorum_device_settings(&conf), Ok(Some(_))),
            Err(_) => false,
        }
    }

    async fn qdevice_teardown(&self) {
        let _ = tokio::fs::remove_dir_all(&self.paths.qdevice_state_dir).await;
    }

    async fn watchdog_active(&self) -> bool {
        self.run("systemctl", &["is-enabled", "sbd"])
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }

    async fn watchdog_config(&self) -> Result<String, HactlError> {
        tokio::fs::read_to_string(&self.paths.watchdog_config)
            .await
            .map_err(|e| {
                HactlError::validation(format!(
                    "unable to read {}: {}",
                    self.paths.watchdog_config.display(),
                    e
                ))
            })
    }

    async fn resolve_address(&self, addr: &str) -> bool {
        tokio::net::lookup_host((addr, 0u16)).await.is_ok()
    }

    async fn evict_node(&self, node: &str) -> Result<(), HactlError> {
        let output = self.run("crm_node", &["--force", "-R", node]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(HactlError::Aggregate(format!(
                "unable to remove {} from the resource manager: {}",
                node,
                output.stdout.trim()
            )))
        }
    }

    async fn assemble_cman_conf(&self, plan: &[CcsCommand]) -> Result<String, HactlError> {
        let scratch =
            std::env::temp_dir().join(format!("hactl-cluster-{}.conf", std::process::id()));
        let scratch_str = scratch.to_string_lossy().into_owned();
        for command in plan {
            let mut args = vec!["-f".to_string(), scratch_str.clone()];
            args.extend(command.args.iter().cloned());
            let argv: Vec<&str> = args.iter().map(String::as_str).collect();
            let output = self.run("ccs", &argv).await?;
            if !output.success() {
                let _ = tokio::fs::remove_file(&scratch).await;
                if output.stdout.trim().is_empty() {
                    return Err(HactlError::Aggregate(command.error_hint.clone()));
                }
                return Err(HactlError::Aggregate(format!(
                    "{}\n{}",
                    output.stdout.trim(),
                    command.error_hint
                )));
            }
        }
        let conf = tokio::fs::read_to_string(&scratch)
            .await
            .map_err(HactlError::ConfigWrite)?;
        let _ = tokio::fs::remove_file(&scratch).await;
        Ok(conf)
    }

    async fn run_tool(&self, argv: &[String]) -> Result<ToolOutput, HactlError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(HactlError::validation("empty command"));
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = self.run(program, &args).await;
        if let Err(e) = &result {
            warn!("{}", e);
        }
        result
    }
}
