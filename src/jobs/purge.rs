use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::daemon::Daemon;
use crate::errors::Result;
use crate::jobs::Job;

/// Drops finished jobs from the daemon's history.
pub struct PurgeHistory {
    daemon: Arc<dyn Daemon>,
}

impl PurgeHistory {
    pub fn new(daemon: Arc<dyn Daemon>) -> Self {
        Self { daemon }
    }
}

#[async_trait]
impl Job for PurgeHistory {
    fn name(&self) -> &'static str {
        "Purge download result"
    }

    async fn run(&self) -> Result<()> {
        self.daemon.purge_download_result().await?;
        debug!("download results purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::fake::FakeDaemon;

    #[tokio::test]
    async fn test_purges_daemon_history() {
        let daemon = Arc::new(FakeDaemon::default());
        let job = PurgeHistory::new(daemon.clone());
        job.run().await.unwrap();
        job.run().await.unwrap();
        assert_eq!(daemon.purges(), 2);
    }
}
