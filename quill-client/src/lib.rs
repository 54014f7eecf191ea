mod backend;
pub use backend::Backend;

mod reply;
pub use reply::{ReplyBox, ReplyState, ReplyTarget};

pub mod render;
pub use render::{RenderOptions, RenderedComment};

mod thread;
pub use thread::{CommentThread, FetchTicket};

pub mod tree;
pub use tree::{build_forest, CommentNode, OrphanPolicy};

pub mod api {
    pub use quill_api::*;
}
