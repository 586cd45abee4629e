use std::error::Error;
use std::path::PathBuf;

use common::prelude::{FsSnapshotStore, RepoHandle};

use crate::state::{AppState, StateError};

#[derive(Debug, Clone)]
pub struct OpContext {
    /// Optional custom dcache directory (defaults to ~/.dcache)
    pub config_path: Option<PathBuf>,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    pub fn load_state(&self) -> Result<AppState, StateError> {
        AppState::load(self.config_path.clone())
    }

    /// Open the node's local cache for a one-shot command
    pub async fn open_repo(&self) -> Result<RepoHandle, StateError> {
        let state = self.load_state()?;
        let store = FsSnapshotStore::new(state.cache_path);
        Ok(RepoHandle::open(&store).await)
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Builds the `Command` subcommand enum from `(Variant, Op)` pairs.
///  Every op's output is rendered to the text printed on stdout.
#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::op::Op for Command {
            type Output = String;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::op::OpContext) -> Result<String, OpError> {
                match self {
                    $(
                        Command::$variant(op) => op
                            .execute(ctx)
                            .await
                            .map(|output| output.to_string())
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}
