use anyhow::Context;
use axum::{extract::Path, Json};
use quill_api::{ArticleId, AuthToken, Comment, NewComment, NewSession, NewUser, UserId, Uuid};

use crate::{db, extractors::*, Error};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await
}

pub async fn auth(
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or(Error::permission_denied())?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user.id)
}

pub async fn fetch_comments(
    Path(article): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Vec<Comment>>, Error> {
    let article = ArticleId(article);
    Ok(Json(
        db::fetch_comments(&mut *conn, article)
            .await
            .with_context(|| format!("fetching comments for {:?}", article))?,
    ))
}

pub async fn submit_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    let comment = db::submit_comment(&mut *conn, &user, data).await?;
    tracing::debug!(comment = %comment.id, user = ?user.id, "new comment");
    Ok(Json(comment))
}
