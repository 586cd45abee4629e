use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct Export {
    /// Print the nested bucket → data object instead of wire messages
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("state error: {0}")]
    StateError(#[from] crate::state::StateError),

    #[error("could not render json: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Export {
    type Error = ExportError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let repo = ctx.open_repo().await?;
        if self.json {
            return Ok(serde_json::to_string_pretty(&repo.summary_dict())?);
        }
        Ok(repo.summary_messages().join("\n"))
    }
}
