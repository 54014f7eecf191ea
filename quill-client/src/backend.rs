use async_trait::async_trait;

use crate::api::{ArticleId, Comment, NewComment};

/// Whatever serves the comment collection of an article, usually the HTTP API
#[async_trait]
pub trait Backend {
    /// All comments of `article`, either flat or already nested
    async fn fetch_comments(&mut self, article: ArticleId) -> anyhow::Result<Vec<Comment>>;

    /// Persist a new comment, returning it as the server recorded it
    async fn submit_comment(&mut self, comment: NewComment) -> anyhow::Result<Comment>;
}
