use async_trait::async_trait;
use reach_types::{ControlMode, ReachError};

use crate::context::{TaskContext, WorldView};
use crate::operation::Operation;

pub struct SetModeOperation {
    name: String,
    mode: ControlMode,
}

impl SetModeOperation {
    pub fn new(mode: ControlMode) -> Self {
        Self { name: format!("set_mode({mode})"), mode }
    }
}

#[async_trait]
impl Operation for SetModeOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        world.pose().map(|_| ())
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        ctx.client.set_mode(self.mode).await?;
        Ok(())
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        match &world.state {
            Some(s) if s.control_mode == self.mode => Ok(()),
            Some(s) => Err(format!("still in {} mode", s.control_mode)),
            None => Err("no robot state".into()),
        }
    }
}
