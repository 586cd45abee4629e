use clap::Args;

use common::prelude::BucketError;

#[derive(Args, Debug, Clone)]
pub struct Query {
    /// Bucket path, one name per argument (e.g. `networks irc`)
    #[arg(required = true)]
    pub path: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("state error: {0}")]
    StateError(#[from] crate::state::StateError),

    #[error(transparent)]
    Bucket(#[from] BucketError),
}

#[async_trait::async_trait]
impl crate::op::Op for Query {
    type Error = QueryError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let repo = ctx.open_repo().await?;
        let data = repo.query(&self.path)?;
        Ok(data.into_iter().collect::<Vec<_>>().join("\n"))
    }
}
