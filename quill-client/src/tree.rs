use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};

use anyhow::anyhow;

use crate::api::{Comment, CommentId};

/// What to do with a comment whose parent is not part of the fetched batch
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OrphanPolicy {
    /// Show it as a top-level comment
    #[default]
    Promote,

    /// Hide it, along with all its replies
    Drop,
}

impl FromStr for OrphanPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<OrphanPolicy> {
        match s {
            "promote" => Ok(OrphanPolicy::Promote),
            "drop" => Ok(OrphanPolicy::Drop),
            _ => Err(anyhow!("unknown orphan policy {s:?}, expected promote or drop")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    /// The comment itself. Its `replies` field is always empty, children live
    /// in `CommentNode::replies`
    pub comment: Comment,

    /// Child nodes, in the order the server returned them
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn id(&self) -> &CommentId {
        &self.comment.id
    }

    /// Number of levels in this subtree, 1 for a comment without replies
    pub fn depth(&self) -> usize {
        let mut res = 0;
        let mut stack = vec![(self, 1)];
        while let Some((n, level)) = stack.pop() {
            res = res.max(level);
            stack.extend(n.replies.iter().map(|r| (r, level + 1)));
        }
        res
    }

    pub fn find(&self, id: &CommentId) -> Option<&CommentNode> {
        find_in(std::slice::from_ref(self), id)
    }

    /// Ids of this subtree, in display order
    pub fn ids(&self) -> Vec<&CommentId> {
        preorder(std::slice::from_ref(self))
            .map(|(n, _)| &n.comment.id)
            .collect()
    }
}

// Threads can be arbitrarily deep, so the default recursive drop is not an option
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.replies);
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.replies);
        }
    }
}

/// Pre-order walk over a forest, along with the nesting level of each node
pub fn preorder(forest: &[CommentNode]) -> Preorder<'_> {
    Preorder {
        stack: forest.iter().rev().map(|n| (n, 0)).collect(),
    }
}

pub struct Preorder<'a> {
    stack: Vec<(&'a CommentNode, usize)>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (&'a CommentNode, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (n, depth) = self.stack.pop()?;
        self.stack
            .extend(n.replies.iter().rev().map(|r| (r, depth + 1)));
        Some((n, depth))
    }
}

/// Total number of nodes in the forest, replies included
pub fn count_nodes(forest: &[CommentNode]) -> usize {
    preorder(forest).count()
}

pub fn find_in<'a>(forest: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
    preorder(forest)
        .map(|(n, _)| n)
        .find(|n| n.comment.id == *id)
}

/// Turn possibly pre-nested comments into a flat list, each reply coming
/// right after its parent. A nested reply that does not name its parent gets
/// the enclosing comment as parent.
///
/// A nested reply that is also present at the top level of `records` is only
/// kept once, from its top-level copy.
pub fn flatten_records(records: &[Comment]) -> Vec<Comment> {
    let top_level = records.iter().map(|c| &c.id).collect::<HashSet<_>>();

    let mut res = Vec::with_capacity(records.len());
    let mut stack = records
        .iter()
        .rev()
        .map(|c| (c, None, false))
        .collect::<Vec<(&Comment, Option<&CommentId>, bool)>>();
    while let Some((c, parent, nested)) = stack.pop() {
        if !(nested && top_level.contains(&c.id)) {
            res.push(Comment {
                id: c.id.clone(),
                content: c.content.clone(),
                author: c.author.clone(),
                created_at: c.created_at,
                parent: c.parent.clone().or_else(|| parent.cloned()),
                replies: Vec::new(),
            });
        } else {
            tracing::debug!(comment = %c.id, "skipping nested copy of a top-level comment");
        }
        stack.extend(c.replies.iter().rev().map(|r| (r, Some(&c.id), true)));
    }
    res
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Link {
    Root,
    Child(usize),
    Orphan,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Visit {
    Todo,
    Walking,
    Done,
}

/// Build the comment forest for one article out of a snapshot of its comments.
///
/// Input order does not matter for linking (a reply may come before its
/// parent), but it is kept for display: top-level comments and the replies of
/// each comment appear in the order they had in `records`.
///
/// This never fails. Comments whose parent cannot be found are handled as per
/// `policy`, and so are comments taking part in a parent cycle (the cycle is
/// cut at the member that comes first in `records`).
pub fn build_forest(records: &[Comment], policy: OrphanPolicy) -> Vec<CommentNode> {
    let records = flatten_records(records);
    let n = records.len();

    let mut index = HashMap::with_capacity(n);
    for (i, c) in records.iter().enumerate() {
        index.entry(&c.id).or_insert(i);
    }

    let mut links = records
        .iter()
        .enumerate()
        .map(|(i, c)| match &c.parent {
            None => Link::Root,
            Some(p) => match index.get(p) {
                Some(&j) if j != i => Link::Child(j),
                _ => {
                    tracing::debug!(comment = %c.id, parent = %p, ?policy, "comment parent not found");
                    Link::Orphan
                }
            },
        })
        .collect::<Vec<_>>();

    break_cycles(&records, &mut links, policy);

    let mut roots = Vec::new();
    let mut children = vec![Vec::new(); n];
    for (i, l) in links.iter().enumerate() {
        match (l, policy) {
            (Link::Root, _) | (Link::Orphan, OrphanPolicy::Promote) => roots.push(i),
            (Link::Orphan, OrphanPolicy::Drop) => (),
            (Link::Child(p), _) => children[*p].push(i),
        }
    }

    assemble(records, &roots, &children)
}

fn break_cycles(records: &[Comment], links: &mut [Link], policy: OrphanPolicy) {
    let mut visit = vec![Visit::Todo; links.len()];
    for start in 0..links.len() {
        let mut path: Vec<usize> = Vec::new();
        let mut cur = start;
        loop {
            match visit[cur] {
                Visit::Done => break,
                Visit::Walking => {
                    // `cur` is on `path`, and everything from there on is a cycle
                    if let Some(pos) = path.iter().position(|&p| p == cur) {
                        if let Some(&cut) = path[pos..].iter().min() {
                            tracing::warn!(comment = %records[cut].id, ?policy, "comment parents form a cycle");
                            links[cut] = Link::Orphan;
                        }
                    }
                    break;
                }
                Visit::Todo => {
                    visit[cur] = Visit::Walking;
                    path.push(cur);
                    match links[cur] {
                        Link::Child(p) => cur = p,
                        Link::Root | Link::Orphan => break,
                    }
                }
            }
        }
        for p in path {
            visit[p] = Visit::Done;
        }
    }
}

/// Turn the index tree into nodes, children first. Records not reachable from
/// `roots` are dropped.
fn assemble(records: Vec<Comment>, roots: &[usize], children: &[Vec<usize>]) -> Vec<CommentNode> {
    let mut order = Vec::with_capacity(records.len());
    let mut stack = roots.to_vec();
    while let Some(i) = stack.pop() {
        order.push(i);
        stack.extend_from_slice(&children[i]);
    }

    let mut records = records.into_iter().map(Some).collect::<Vec<_>>();
    let mut built: Vec<Option<CommentNode>> = Vec::new();
    built.resize_with(records.len(), || None);
    // in reverse pre-order, all children of a node are built before it
    for &i in order.iter().rev() {
        let replies = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(comment) = records[i].take() {
            built[i] = Some(CommentNode { comment, replies });
        }
    }
    roots.iter().filter_map(|&r| built[r].take()).collect()
}
