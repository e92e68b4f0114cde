//! ServiceController - Fans lifecycle operations out to every collector
//!
//! Collectors share nothing, so there is no ordering between them: start goes
//! through them one by one, stop drains all of them concurrently.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};

use super::collector::CollectorController;
use super::state::ShutdownReport;
use crate::config::Config;
use crate::error::CollectorResult;
use crate::stream::AlertSource;

pub struct ServiceController {
    collectors: Vec<CollectorController>,
}

impl ServiceController {
    /// Build one collector controller per configured collector
    pub fn new(config: &Config, source: Arc<dyn AlertSource>) -> Self {
        let collectors = config
            .collectors
            .iter()
            .map(|collector| {
                CollectorController::new(
                    collector.clone(),
                    config.api_key.as_str(),
                    source.clone(),
                    config.tuning.clone(),
                )
            })
            .collect();

        Self { collectors }
    }

    pub fn collectors(&self) -> &[CollectorController] {
        &self.collectors
    }

    /// Start every collector
    ///
    /// Stops at the first collector that fails to start. Collectors started
    /// before it keep running; call [`stop`](Self::stop) to wind them down.
    pub async fn start(&mut self) -> CollectorResult<()> {
        for collector in &mut self.collectors {
            collector.start().await?;
        }

        info!("started {} collectors", self.collectors.len());
        Ok(())
    }

    /// Gracefully shut down every collector concurrently
    pub async fn stop(&mut self) -> Vec<ShutdownReport> {
        debug!("stopping {} collectors", self.collectors.len());

        join_all(
            self.collectors
                .iter_mut()
                .map(|collector| collector.shutdown()),
        )
        .await
    }

    /// Restart crashed workers of every running collector
    pub async fn supervise(&mut self) {
        for collector in &mut self.collectors {
            if collector.is_healthy() {
                continue;
            }
            if let Err(e) = collector.supervise().await {
                error!(collector = collector.id(), "supervision failed: {e}");
            }
        }
    }
}
