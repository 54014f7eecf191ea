use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
pub use auth::{AuthToken, NewSession};

mod comment;
pub use comment::{ArticleId, Author, Comment, CommentId, NewComment};

mod error;
pub use error::Error;

mod user;
pub use user::{NewUser, User, UserId};

/// Strings cross the wire into postgres, which refuses null bytes in text
pub(crate) fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// User names end up in `user:password` basic-auth style strings and in
/// rendered comment headers, so keep them to a single visible word
pub(crate) fn validate_name(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c.is_control() || c == ':') {
        return Err(Error::InvalidName(String::from(s)));
    }
    Ok(())
}
