use clap::Args;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Default log level written to the config (default: info)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Channels to rebroadcast on (default: stdout)
    #[arg(long = "channel")]
    pub channels: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig {
            log_level: self.log_level.clone(),
            ..AppConfig::default()
        };
        if !self.channels.is_empty() {
            config.rebroadcast.channels = self.channels.clone();
        }

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let buckets = state
            .config
            .buckets
            .iter()
            .map(|acl| format!("   {} <- {:?}", acl.path.join("/"), acl.allowed))
            .collect::<Vec<_>>()
            .join("\n");

        let output = format!(
            "Initialized dcache directory at: {}\n\
             - Config: {}\n\
             - Cache: {}\n\
             - Rebroadcast channels: {}\n\
             - Buckets:\n{}",
            state.dcache_dir.display(),
            state.config_path.display(),
            state.cache_path.display(),
            state.config.rebroadcast.channels.join(", "),
            buckets
        );

        Ok(output)
    }
}
