use std::fmt;

use chrono::format::{Item, StrftimeItems};

use crate::{
    api::{CommentId, Time},
    tree::{preorder, CommentNode},
    ReplyBox, ReplyState, ReplyTarget,
};

#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Columns of indentation per nesting level
    pub indent_width: usize,

    /// Deeper comments are still rendered, just not indented any further
    pub max_indent_depth: usize,

    /// `chrono` strftime format
    pub time_format: String,
    pub timezone: chrono_tz::Tz,
}

impl Default for RenderOptions {
    fn default() -> RenderOptions {
        RenderOptions {
            indent_width: 4,
            max_indent_depth: 6,
            time_format: String::from("%Y-%m-%d %H:%M"),
            timezone: chrono_tz::UTC,
        }
    }
}

impl RenderOptions {
    /// Falls back to RFC 3339 when `time_format` is not a valid format string
    pub fn format_time(&self, t: &Time) -> String {
        let local = t.with_timezone(&self.timezone);
        if StrftimeItems::new(&self.time_format).any(|i| matches!(i, Item::Error)) {
            tracing::warn!(format = %self.time_format, "invalid time format");
            return local.to_rfc3339();
        }
        local.format(&self.time_format).to_string()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedComment {
    pub id: CommentId,
    pub depth: usize,
    pub indent: usize,
    pub author: String,
    pub badge: Option<&'static str>,
    pub timestamp: String,
    pub body: String,
    pub reply: ReplyState,
}

/// Render a whole thread in display order, each comment followed by its replies
pub fn render_forest(
    forest: &[CommentNode],
    replies: &ReplyBox,
    opts: &RenderOptions,
) -> Vec<RenderedComment> {
    preorder(forest)
        .map(|(node, depth)| {
            let c = &node.comment;
            RenderedComment {
                id: c.id.clone(),
                depth,
                indent: depth.min(opts.max_indent_depth) * opts.indent_width,
                author: c.author.name.clone(),
                badge: c.author.is_admin.then_some("admin"),
                timestamp: opts.format_time(&c.created_at),
                body: c.content.clone(),
                reply: replies.state(&ReplyTarget::Comment(c.id.clone())),
            }
        })
        .collect()
}

pub fn render_to_string(forest: &[CommentNode], replies: &ReplyBox, opts: &RenderOptions) -> String {
    render_forest(forest, replies, opts)
        .into_iter()
        .map(|c| c.to_string())
        .collect()
}

impl fmt::Display for RenderedComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pad = " ".repeat(self.indent);
        write!(f, "{pad}{}", self.author)?;
        if let Some(badge) = self.badge {
            write!(f, " [{badge}]")?;
        }
        writeln!(f, " · {} (#{})", self.timestamp, self.id)?;
        for line in self.body.lines() {
            writeln!(f, "{pad}  {line}")?;
        }
        if let ReplyState::Composing { draft } = &self.reply {
            writeln!(f, "{pad}  > replying: {draft}")?;
        }
        Ok(())
    }
}
