use std::collections::{btree_map, BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use quill_client::{
    api::{
        ArticleId, AuthToken, Author, Comment, CommentId, Error, NewComment, NewSession, NewUser,
        UserId, Uuid,
    },
    Backend,
};

/// In-memory implementation of the comment API, behaving like the real server
pub struct MockServer {
    users: BTreeMap<UserId, DbUser>,
    articles: HashMap<ArticleId, Vec<Comment>>,
}

#[derive(Debug)]
struct DbUser {
    name: String,
    pass_hash: String,
    is_admin: bool,
    sessions: HashMap<AuthToken, Device>,
}

#[derive(Debug)]
struct Device(String);

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            users: BTreeMap::new(),
            articles: HashMap::new(),
        }
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    /// Tests don't actually use bcrypt: the password is the "hash" itself
    pub fn admin_create_user(&mut self, u: NewUser) -> Result<(), Error> {
        u.validate()?;

        if self.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbUser {
                    name: u.name,
                    pass_hash: u.initial_password_hash,
                    is_admin: u.is_admin,
                    sessions: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let u = self
            .users
            .values_mut()
            .find(|u| u.name == s.user)
            .ok_or(Error::PermissionDenied)?;
        if s.password != u.pass_hash {
            return Err(Error::PermissionDenied);
        }
        let tok = AuthToken(Uuid::new_v4());
        u.sessions.insert(tok, Device(s.device));
        Ok(tok)
    }

    fn resolve(&self, tok: AuthToken) -> Result<(UserId, &DbUser), Error> {
        self.users
            .iter()
            .find(|(_, u)| u.sessions.contains_key(&tok))
            .map(|(id, u)| (*id, u))
            .ok_or(Error::PermissionDenied)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        let u = self
            .users
            .values_mut()
            .find(|u| u.sessions.contains_key(&tok))
            .ok_or(Error::PermissionDenied)?;
        if let Some(Device(device)) = u.sessions.remove(&tok) {
            tracing::debug!(?device, "closed mock session");
        }
        Ok(())
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        Ok(self.resolve(tok)?.0)
    }

    /// Flat list of the article's comments, oldest first
    pub fn fetch_comments(&self, article: ArticleId) -> Vec<Comment> {
        let mut res = self.articles.get(&article).cloned().unwrap_or_default();
        res.sort_by_key(|c| c.created_at);
        res
    }

    pub fn submit_comment(&mut self, tok: AuthToken, c: NewComment) -> Result<Comment, Error> {
        let (author_id, user) = self.resolve(tok)?;
        c.validate()?;
        let author = Author {
            id: Some(author_id),
            name: user.name.clone(),
            is_admin: user.is_admin,
        };
        let comments = self.articles.entry(c.article).or_insert_with(Vec::new);
        if let Some(parent) = &c.parent {
            if !comments.iter().any(|o| o.id == *parent) {
                return Err(Error::UnknownParent(parent.clone()));
            }
        }
        let comment = Comment {
            id: CommentId::new_random(),
            content: c.content,
            author,
            created_at: Utc::now(),
            parent: c.parent,
            replies: Vec::new(),
        };
        comments.push(comment.clone());
        Ok(comment)
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

/// A logged-in view of a `MockServer`, usable wherever the HTTP API is
pub struct MockClient<'a> {
    pub server: &'a mut MockServer,
    pub token: AuthToken,
}

#[async_trait]
impl<'a> Backend for MockClient<'a> {
    async fn fetch_comments(&mut self, article: ArticleId) -> anyhow::Result<Vec<Comment>> {
        Ok(self.server.fetch_comments(article))
    }

    async fn submit_comment(&mut self, comment: NewComment) -> anyhow::Result<Comment> {
        Ok(self.server.submit_comment(self.token, comment)?)
    }
}
