use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct Summary;

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("state error: {0}")]
    StateError(#[from] crate::state::StateError),
}

#[async_trait::async_trait]
impl crate::op::Op for Summary {
    type Error = SummaryError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let repo = ctx.open_repo().await?;
        Ok(repo.summary())
    }
}
