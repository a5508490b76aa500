use std::time::Duration;

use async_trait::async_trait;
use reach_types::ReachError;

use crate::context::TaskContext;
use crate::operation::Operation;

/// Idles for a fixed duration. Always succeeds.
pub struct WaitOperation {
    duration: Duration,
}

impl WaitOperation {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Operation for WaitOperation {
    fn name(&self) -> &str {
        "wait"
    }

    async fn action(&mut self, _ctx: &mut TaskContext) -> Result<(), ReachError> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}
