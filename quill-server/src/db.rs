use anyhow::Context;
use chrono::Utc;
use quill_api::{
    ArticleId, AuthToken, Author, Comment, CommentId, NewComment, NewSession, NewUser, Time, User,
    UserId, Uuid,
};
use sqlx::{postgres::PgRow, Row};

use crate::Error;

pub async fn create_user(conn: &mut sqlx::PgConnection, user: NewUser) -> Result<(), Error> {
    let conflict = sqlx::query("SELECT id, name FROM users WHERE id = $1 OR name = $2")
        .bind(user.id.0)
        .bind(&user.name)
        .fetch_optional(&mut *conn)
        .await
        .context("checking for conflicting users")?;
    if let Some(row) = conflict {
        let name: String = row.try_get("name").context("retrieving the name field")?;
        if name == user.name {
            return Err(Error::name_already_used(user.name));
        }
        return Err(Error::uuid_already_used(user.id.0));
    }
    sqlx::query("INSERT INTO users (id, name, password_hash, is_admin) VALUES ($1, $2, $3, $4)")
        .bind(user.id.0)
        .bind(&user.name)
        .bind(&user.initial_password_hash)
        .bind(user.is_admin)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("inserting user {:?}", user.id))?;
    tracing::info!(user = ?user.id, name = %user.name, "created user");
    Ok(())
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    session: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let user = sqlx::query("SELECT id, password_hash FROM users WHERE name = $1")
        .bind(&session.user)
        .fetch_optional(&mut *conn)
        .await
        .context("fetching user to log in")?;
    let Some(user) = user else {
        return Ok(None);
    };
    let user_id: Uuid = user.try_get("id").context("retrieving the id field")?;
    let hash: String = user
        .try_get("password_hash")
        .context("retrieving the password_hash field")?;
    if !bcrypt::verify(&session.password, &hash).unwrap_or(false) {
        return Ok(None);
    }

    let token = AuthToken(Uuid::new_v4());
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO sessions (id, user_id, device, login_time, last_active) VALUES ($1, $2, $3, $4, $4)",
    )
    .bind(token.0)
    .bind(user_id)
    .bind(&session.device)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("inserting new session")?;
    Ok(Some(token))
}

/// Returns whether a session was actually removed
pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(&mut *conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() == 1)
}

pub async fn recover_session(conn: &mut sqlx::PgConnection, token: AuthToken) -> Result<User, Error> {
    let row = sqlx::query(
        "
            UPDATE sessions s
                SET last_active = $1
            FROM users u
            WHERE s.id = $2 AND u.id = s.user_id
            RETURNING u.id, u.name, u.is_admin
        ",
    )
    .bind(Utc::now())
    .bind(token.0)
    .fetch_optional(&mut *conn)
    .await
    .context("recovering session")?
    .ok_or_else(Error::permission_denied)?;
    Ok(User {
        id: UserId(row.try_get("id").context("retrieving the id field")?),
        name: row.try_get("name").context("retrieving the name field")?,
        is_admin: row
            .try_get("is_admin")
            .context("retrieving the is_admin field")?,
    })
}

fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        content: row.try_get("content").context("retrieving the content field")?,
        author: Author {
            id: Some(UserId(
                row.try_get("author_id")
                    .context("retrieving the author_id field")?,
            )),
            name: row
                .try_get("author_name")
                .context("retrieving the author_name field")?,
            is_admin: row
                .try_get("author_is_admin")
                .context("retrieving the author_is_admin field")?,
        },
        created_at: row
            .try_get::<Time, _>("created_at")
            .context("retrieving the created_at field")?,
        parent: row
            .try_get::<Option<String>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        replies: Vec::new(),
    })
}

/// Flat list of the comments of `article`, oldest first
pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    article: ArticleId,
) -> anyhow::Result<Vec<Comment>> {
    let rows = sqlx::query(
        "
            SELECT
                c.id, c.content, c.parent_id, c.created_at,
                u.id AS author_id, u.name AS author_name, u.is_admin AS author_is_admin
            FROM comments c
            INNER JOIN users u
                ON u.id = c.owner_id
            WHERE c.article_id = $1
            ORDER BY c.created_at, c.seq
        ",
    )
    .bind(article.0)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("querying comments of article {:?}", article))?;
    rows.iter().map(comment_from_row).collect()
}

/// Insert a comment signed by `author`, who is trusted to be logged in
pub async fn submit_comment(
    conn: &mut sqlx::PgConnection,
    author: &User,
    new: NewComment,
) -> Result<Comment, Error> {
    new.validate()?;
    if let Some(parent) = &new.parent {
        let found = sqlx::query("SELECT 1 FROM comments WHERE id = $1 AND article_id = $2")
            .bind(&parent.0)
            .bind(new.article.0)
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("checking parent comment {parent}"))?;
        if found.is_none() {
            return Err(Error::unknown_parent(parent.clone()));
        }
    }

    let id = CommentId::new_random();
    let row = sqlx::query(
        "
            INSERT INTO comments (id, article_id, owner_id, parent_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created_at
        ",
    )
    .bind(&id.0)
    .bind(new.article.0)
    .bind(author.id.0)
    .bind(new.parent.as_ref().map(|p| p.0.clone()))
    .bind(&new.content)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("inserting comment {id}"))?;

    Ok(Comment {
        id,
        content: new.content,
        author: Author {
            id: Some(author.id),
            name: author.name.clone(),
            is_admin: author.is_admin,
        },
        created_at: row
            .try_get::<Time, _>("created_at")
            .context("retrieving the created_at field")?,
        parent: new.parent,
        replies: Vec::new(),
    })
}
