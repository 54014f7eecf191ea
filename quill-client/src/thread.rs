use anyhow::Context;

use crate::{
    api::{ArticleId, Comment},
    render::{render_forest, RenderOptions, RenderedComment},
    tree::{build_forest, find_in, CommentNode, OrphanPolicy},
    Backend, ReplyBox, ReplyTarget,
};

/// Identifies one fetch of the comment collection. Later fetches get
/// greater tickets.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct FetchTicket(u64);

/// The comment thread shown under one article
#[derive(Clone, Debug)]
pub struct CommentThread {
    pub article: ArticleId,
    pub policy: OrphanPolicy,
    pub replies: ReplyBox,
    forest: Vec<CommentNode>,
    last_issued: u64,
    loaded: bool,
}

impl CommentThread {
    pub fn new(article: ArticleId, policy: OrphanPolicy) -> CommentThread {
        CommentThread {
            article,
            policy,
            replies: ReplyBox::new(),
            forest: Vec::new(),
            last_issued: 0,
            loaded: false,
        }
    }

    pub fn forest(&self) -> &[CommentNode] {
        &self.forest
    }

    /// Whether at least one fetch already completed
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn render(&self, opts: &RenderOptions) -> Vec<RenderedComment> {
        render_forest(&self.forest, &self.replies, opts)
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.last_issued += 1;
        FetchTicket(self.last_issued)
    }

    /// Replace the displayed thread with a freshly fetched snapshot, unless a
    /// more recent fetch was issued in the meantime. Returns whether the
    /// snapshot was applied.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, records: &[Comment]) -> bool {
        if ticket.0 != self.last_issued {
            tracing::debug!(
                ?ticket,
                last_issued = self.last_issued,
                "discarding stale comment fetch"
            );
            return false;
        }
        self.forest = build_forest(records, self.policy);
        self.loaded = true;
        let forest = &self.forest;
        self.replies
            .retain_targets(|id| find_in(forest, id).is_some());
        true
    }

    pub async fn refresh<B: Backend + ?Sized>(&mut self, backend: &mut B) -> anyhow::Result<bool> {
        let ticket = self.begin_fetch();
        let records = backend
            .fetch_comments(self.article)
            .await
            .with_context(|| format!("fetching comments of article {:?}", self.article))?;
        Ok(self.complete_fetch(ticket, &records))
    }

    /// Submit the draft open on `target`, then reload the thread.
    ///
    /// On failure the draft stays open so that it can be retried. Once the
    /// comment is accepted this succeeds, even if reloading the thread fails:
    /// the displayed thread is then left as is until the next refresh.
    pub async fn submit<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        target: &ReplyTarget,
    ) -> anyhow::Result<Comment> {
        let new = self
            .replies
            .prepare_submission(target, self.article)
            .with_context(|| format!("no reply is being composed for {target:?}"))?;
        new.validate().context("validating comment")?;
        let created = backend
            .submit_comment(new)
            .await
            .with_context(|| format!("submitting comment for {target:?}"))?;
        self.replies.submission_succeeded(target);
        if let Err(err) = self.refresh(backend).await {
            tracing::warn!(?err, comment = %created.id, "failed reloading comments after submission");
        }
        Ok(created)
    }
}
