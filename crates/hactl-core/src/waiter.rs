//! Deadline-driven convergence waiting
//!
//! A waiter polls a status source every two seconds until the target
//! reports online and not pending, the deadline passes, or a fatal
//! communication failure makes further polling pointless. Waiting on a
//! node set drives every member's poll loop concurrently through the
//! fan-out and reports the aggregate node-labelled outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::{NodeError, NodeStatus, RemoteNodeClient};
use crate::fanout::{FanoutReport, NodeFanout};

/// Terminal state of a convergence wait
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Converged,
    TimedOut,
    /// A non-retryable failure, reported without waiting for the deadline
    Failed(String),
}

/// Polls a target until it converges or the deadline passes
#[derive(Clone, Copy, Debug)]
pub struct ConvergenceWaiter {
    interval: Duration,
    timeout: Duration,
}

impl ConvergenceWaiter {
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            interval: Self::POLL_INTERVAL,
            timeout: timeout.unwrap_or(Self::DEFAULT_TIMEOUT),
        }
    }

    /// Poll one status source until it converges
    pub async fn wait<F, Fut>(&self, mut poll: F) -> WaitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<NodeStatus, NodeError>>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            match poll().await {
                Ok(status) if status.converged() => return WaitOutcome::Converged,
                Ok(_) => {}
                Err(e) if e.is_fatal() => return WaitOutcome::Failed(e.message),
                Err(_) => {}
            }
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Wait until every node of a set has converged
    ///
    /// Each member runs its own poll loop; the set converges only when
    /// all members do.
    pub async fn wait_nodes(
        &self,
        fanout: &NodeFanout,
        client: Arc<dyn RemoteNodeClient>,
        nodes: &[String],
    ) -> FanoutReport {
        let waiter = *self;
        fanout
            .run(nodes, |node| {
                let client = client.clone();
                async move {
                    let outcome = waiter.wait(|| {
                        let client = client.clone();
                        let node = node.clone();
                        async move { client.node_status(&node).await }
                    });
                    match outcome.await {
                        WaitOutcome::Converged => Ok("Started".to_string()),
                        WaitOutcome::TimedOut => Err(NodeError::fatal("Waiting timeout")),
                        WaitOutcome::Failed(message) => Err(NodeError::fatal(message)),
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn waiter(secs: u64) -> ConvergenceWaiter {
        ConvergenceWaiter::new(Some(Duration::from_secs(secs)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_once_online_and_not_pending() {
        let states = Mutex::new(vec![
            NodeStatus {
                online: false,
                pending: false,
            },
            NodeStatus {
                online: true,
                pending: true,
            },
            NodeStatus {
                online: true,
                pending: false,
            },
        ]);
        let outcome = waiter(900)
            .wait(|| {
                let status = {
                    let mut states = states.lock().unwrap();
                    if states.len() > 1 {
                        states.remove(0)
                    } else {
                        states[0]
                    }
                };
                async move { Ok(status) }
            })
            .await;
        assert_eq!(outcome, WaitOutcome::Converged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_predicate_never_holds() {
        let polls = Mutex::new(0u32);
        let outcome = waiter(10)
            .wait(|| {
                *polls.lock().unwrap() += 1;
                async move { Ok(NodeStatus::default()) }
            })
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // 2 second interval over a 10 second deadline
        assert_eq!(*polls.lock().unwrap(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_keep_polling() {
        let polls = Mutex::new(0u32);
        let outcome = waiter(900)
            .wait(|| {
                let attempt = {
                    let mut polls = polls.lock().unwrap();
                    *polls += 1;
                    *polls
                };
                async move {
                    if attempt < 4 {
                        Err(NodeError::retryable("unable to connect"))
                    } else {
                        Ok(NodeStatus {
                            online: true,
                            pending: false,
                        })
                    }
                }
            })
            .await;
        assert_eq!(outcome, WaitOutcome::Converged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_fails_without_waiting() {
        let started = Instant::now();
        let outcome = waiter(900)
            .wait(|| async { Err(NodeError::fatal("Permission denied")) })
            .await;
        assert_eq!(outcome, WaitOutcome::Failed("Permission denied".to_string()));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
