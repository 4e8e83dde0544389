//! Bounded-parallel dispatch of one operation across many nodes
//!
//! A failing node never stops the others; the batch always runs to
//! completion and the result list preserves the input node ordering
//! regardless of completion order. Callers needing partial-success
//! semantics inspect the per-node results instead of the aggregate.

use std::future::Future;

use futures::StreamExt;
use futures::stream;

use hactl_common::{HactlError, NodeOperationResult};

use crate::client::NodeError;

const DEFAULT_PARALLELISM: usize = 8;

/// Outcome of a fan-out batch, in input node order
#[derive(Clone, Debug, Default)]
pub struct FanoutReport {
    pub results: Vec<NodeOperationResult>,
}

impl FanoutReport {
    /// The batch as a whole succeeded only if every node did
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn successes(&self) -> impl Iterator<Item = &NodeOperationResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeOperationResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// One aggregated, node-labelled error report for the whole batch
    pub fn error_summary(&self, prefix: &str) -> String {
        let mut lines = vec![prefix.to_string()];
        lines.extend(self.failures().map(NodeOperationResult::to_string));
        lines.join("\n")
    }

    /// Turn the batch into an error unless every node succeeded
    pub fn require_all(self, prefix: &str) -> Result<Self, HactlError> {
        if self.all_succeeded() {
            Ok(self)
        } else {
            Err(HactlError::Aggregate(self.error_summary(prefix)))
        }
    }
}

/// Bounded-parallel node dispatcher
#[derive(Clone, Copy, Debug)]
pub struct NodeFanout {
    parallelism: usize,
}

impl Default for NodeFanout {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl NodeFanout {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    /// Run one operation against every node
    ///
    /// At most `parallelism` operations are in flight at once; results
    /// come back in input order once all nodes have completed.
    pub async fn run<F, Fut>(&self, nodes: &[String], op: F) -> FanoutReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<String, NodeError>>,
    {
        let results = stream::iter(nodes.iter().cloned().map(|node| {
            let fut = op(node.clone());
            async move {
                match fut.await {
                    Ok(message) => NodeOperationResult::success(node, message),
                    Err(e) => NodeOperationResult::failure(node, e.message),
                }
            }
        }))
        .buffered(self.parallelism)
        .collect()
        .await;
        FanoutReport { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn nodes(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("node-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let fanout = NodeFanout::new(4);
        let targets = nodes(6);
        // later nodes finish first
        let report = fanout
            .run(&targets, |node| async move {
                let index: u64 = node.strip_prefix("node-").unwrap().parse().unwrap();
                tokio::time::sleep(Duration::from_millis(60 - index * 10)).await;
                Ok(node)
            })
            .await;
        let order: Vec<_> = report.results.iter().map(|r| r.node.clone()).collect();
        assert_eq!(order, targets);
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let fanout = NodeFanout::default();
        let targets = nodes(5);
        let report = fanout
            .run(&targets, |node| async move {
                if node == "node-1" || node == "node-3" {
                    Err(NodeError::fatal("connection refused"))
                } else {
                    Ok("Started".to_string())
                }
            })
            .await;
        assert!(!report.all_succeeded());
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.successes().count(), 3);
        let failed: Vec<_> = report.failures().map(|r| r.node.as_str()).collect();
        assert_eq!(failed, ["node-1", "node-3"]);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let fanout = NodeFanout::new(2);
        let targets = nodes(8);
        fanout
            .run(&targets, |_node| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok("ok".to_string())
                }
            })
            .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_error_summary_is_node_labelled() {
        let fanout = NodeFanout::default();
        let targets = nodes(2);
        let report = fanout
            .run(&targets, |node| async move {
                Err::<String, _>(NodeError::retryable(format!("{} unreachable", node)))
            })
            .await;
        assert_eq!(
            report.error_summary("unable to start all nodes"),
            "unable to start all nodes\nnode-0: node-0 unreachable\nnode-1: node-1 unreachable"
        );
        assert!(report.require_all("unable to start all nodes").is_err());
    }
}
