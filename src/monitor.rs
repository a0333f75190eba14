use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time};
use tracing::{info, warn};

use crate::{
    clients::rbmq::BrokerAdmin,
    models::{
        response::QueueDepth,
        topology::{QueueAlias, QueueTopology},
    },
};

/// Periodically samples queue depths. A non-empty dead-letter queue, or one
/// whose depth could not be read, is always reported as an alert.
#[derive(Clone)]
pub struct QueueMonitor {
    broker: Arc<dyn BrokerAdmin>,
    topology: QueueTopology,
}

impl QueueMonitor {
    pub fn new(broker: Arc<dyn BrokerAdmin>, topology: QueueTopology) -> Self {
        Self { broker, topology }
    }

    /// One depth reading per known queue. A queue the broker could not
    /// report on has no depth.
    pub async fn sample(&self) -> Vec<QueueDepth> {
        let mut depths = Vec::with_capacity(QueueAlias::ALL.len());

        for alias in QueueAlias::ALL {
            let queue = self.topology.queue_for(alias);

            let depth = match self.broker.queue_depth(queue).await {
                Ok(depth) => Some(depth),
                Err(e) => {
                    warn!(queue, error = %e, "Failed to read queue depth");
                    None
                }
            };

            depths.push(QueueDepth {
                alias,
                queue: queue.to_string(),
                depth,
            });
        }

        depths
    }

    /// Samples once and logs the result. Returns whether an alert was raised.
    pub async fn check(&self) -> bool {
        let depths = self.sample().await;

        for reading in &depths {
            if let Some(depth) = reading.depth {
                info!(queue = %reading.queue, alias = reading.alias.as_str(), depth, "Queue depth");
            }
        }

        let dead_letter_unknown = depths
            .iter()
            .any(|reading| reading.alias == QueueAlias::DeadLetter && reading.depth.is_none());

        if dead_letter_unknown {
            warn!(
                target: "delivery_service::alert",
                alert = true,
                queue = %self.topology.dead_letter.queue,
                "Dead-letter queue depth is unknown"
            );
            return true;
        }

        let dead_letters = dead_letter_depth(&depths);

        if dead_letters > 0 {
            warn!(
                target: "delivery_service::alert",
                alert = true,
                queue = %self.topology.dead_letter.queue,
                depth = dead_letters,
                "Dead-letter queue is not empty"
            );
            return true;
        }

        false
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(interval);

        info!(interval_seconds = interval.as_secs(), "Queue monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Queue monitor stopped");
    }
}

pub fn dead_letter_depth(depths: &[QueueDepth]) -> u32 {
    depths
        .iter()
        .filter(|reading| reading.alias == QueueAlias::DeadLetter)
        .filter_map(|reading| reading.depth)
        .sum()
}
