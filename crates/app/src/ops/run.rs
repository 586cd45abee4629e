use clap::Args;

use crate::process::{spawn_node, NodeConfig};
use crate::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Run {
    /// Channel name recorded for frames read from stdin
    #[arg(long, default_value = "stdin")]
    pub channel: String,

    /// Override the configured log level
    #[arg(long)]
    pub log_level: Option<tracing::Level>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("state error: {0}")]
    StateError(#[from] crate::state::StateError),

    #[error("node failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::op::Op for Run {
    type Error = RunError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;

        let mut config = NodeConfig::from_state(&state, &self.channel);
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        spawn_node(&config)
            .await
            .map_err(|e| RunError::Failed(format!("{:#}", e)))?;
        Ok(String::new())
    }
}
