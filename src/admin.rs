use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    clients::rbmq::BrokerAdmin,
    error::AdminError,
    models::{
        response::PurgeResult,
        topology::{QueueAlias, QueueTopology},
    },
};

/// Destructive operator commands. Purged messages are dropped, not
/// dead-lettered, and the topology itself is left in place.
#[derive(Clone)]
pub struct QueueAdminService {
    broker: Arc<dyn BrokerAdmin>,
    topology: QueueTopology,
}

impl QueueAdminService {
    pub fn new(broker: Arc<dyn BrokerAdmin>, topology: QueueTopology) -> Self {
        Self { broker, topology }
    }

    pub async fn purge(&self, name: &str) -> Result<PurgeResult, AdminError> {
        let alias = QueueAlias::parse(name).ok_or_else(|| {
            warn!(queue = name, "Purge requested for unknown queue");
            AdminError::UnknownQueue(name.to_string())
        })?;

        self.purge_alias(alias).await
    }

    pub async fn purge_all(&self) -> Result<Vec<PurgeResult>, AdminError> {
        let mut results = Vec::with_capacity(QueueAlias::ALL.len());

        for alias in QueueAlias::ALL {
            results.push(self.purge_alias(alias).await?);
        }

        Ok(results)
    }

    async fn purge_alias(&self, alias: QueueAlias) -> Result<PurgeResult, AdminError> {
        let queue = self.topology.queue_for(alias);
        let purged = self.broker.purge_queue(queue).await?;

        info!(queue, alias = alias.as_str(), purged, "Queue purged");

        Ok(PurgeResult {
            alias,
            queue: queue.to_string(),
            purged,
        })
    }
}
