use std::collections::HashMap;

use crate::api::{ArticleId, CommentId, NewComment};

/// Where a new comment would be attached
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ReplyTarget {
    /// A top-level comment on the article itself
    Article,
    Comment(CommentId),
}

impl ReplyTarget {
    pub fn parent(&self) -> Option<&CommentId> {
        match self {
            ReplyTarget::Article => None,
            ReplyTarget::Comment(c) => Some(c),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplyState {
    Idle,
    Composing { draft: String },
}

/// Composer state of every node of a thread. Targets not in here are idle.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReplyBox {
    drafts: HashMap<ReplyTarget, String>,
}

impl ReplyBox {
    pub fn new() -> ReplyBox {
        ReplyBox::default()
    }

    pub fn state(&self, target: &ReplyTarget) -> ReplyState {
        match self.drafts.get(target) {
            None => ReplyState::Idle,
            Some(draft) => ReplyState::Composing {
                draft: draft.clone(),
            },
        }
    }

    pub fn is_composing(&self, target: &ReplyTarget) -> bool {
        self.drafts.contains_key(target)
    }

    /// Open the composer if it was closed, close it (losing the draft) otherwise
    pub fn toggle(&mut self, target: ReplyTarget) {
        if self.drafts.remove(&target).is_none() {
            self.drafts.insert(target, String::new());
        }
    }

    pub fn cancel(&mut self, target: &ReplyTarget) {
        self.drafts.remove(target);
    }

    /// Replace the draft. Ignored when the composer is not open.
    pub fn edit(&mut self, target: &ReplyTarget, text: String) -> bool {
        match self.drafts.get_mut(target) {
            Some(draft) => {
                *draft = text;
                true
            }
            None => false,
        }
    }

    /// Build the payload for submitting the draft. The composer stays open
    /// until `submission_succeeded` is called.
    pub fn prepare_submission(
        &self,
        target: &ReplyTarget,
        article: ArticleId,
    ) -> Option<NewComment> {
        self.drafts.get(target).map(|draft| NewComment {
            article,
            content: draft.clone(),
            parent: target.parent().cloned(),
        })
    }

    pub fn submission_succeeded(&mut self, target: &ReplyTarget) {
        self.drafts.remove(target);
    }

    /// Drop composers of comments that are no longer displayed
    pub fn retain_targets(&mut self, mut keep: impl FnMut(&CommentId) -> bool) {
        self.drafts.retain(|t, _| match t {
            ReplyTarget::Article => true,
            ReplyTarget::Comment(c) => keep(c),
        });
    }
}
