//! Page stability waiting

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::browser::driver::PageDriver;

/// Blocks until the page is judged quiescent. Never fails: a page that does
/// not settle in time is used as it is.
#[async_trait]
pub trait Stabilizer: Send + Sync {
    async fn wait_until_stable(&self, driver: &dyn PageDriver);
}

/// Waits for the load state, then a short fixed settle delay
#[derive(Debug, Clone)]
pub struct LoadStateStabilizer {
    pub load_timeout: Duration,
    pub settle: Duration,
}

impl Default for LoadStateStabilizer {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(10),
            settle: Duration::from_millis(300),
        }
    }
}

#[async_trait]
impl Stabilizer for LoadStateStabilizer {
    async fn wait_until_stable(&self, driver: &dyn PageDriver) {
        if let Err(e) = driver.wait_for_load_state(self.load_timeout).await {
            debug!(error = %e, "load state wait failed, continuing");
        }
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }
}

/// Does not wait at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStabilizer;

#[async_trait]
impl Stabilizer for NoopStabilizer {
    async fn wait_until_stable(&self, _driver: &dyn PageDriver) {}
}
