use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::{LOG_TARGET, NodeHandle};

/// Periodic analytics driver.
///
/// Runs the pipeline stages sequentially so they share one freshly built
/// graph: clusters before trust (trust consults cluster rows for spam
/// classification), trust last. The stages tolerate storage failures
/// individually; a cycle never aborts halfway.
pub(crate) struct AnalyticsCycle {
    node: NodeHandle,
    interval: Duration,
}

impl AnalyticsCycle {
    pub fn new(node: NodeHandle, interval: Duration) -> Self {
        debug!(target: LOG_TARGET, interval_secs = interval.as_secs(), "Starting analytics cycle task");
        Self { node, interval }
    }

    #[instrument(skip(self), ret)]
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let Some(node) = self.node.upgrade() else {
                break;
            };
            node.run_analytics_cycle().await;
        }

        info!(target: LOG_TARGET, "Node gone; analytics cycle task finished");
    }
}
