use std::ops::{Deref, DerefMut};

use anyhow::Context;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{self, request},
};
use quill_api::{AuthToken, User, Uuid};

use crate::{db, Error};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub admin_token: AdminToken,
}

/// Bearer of this token may create users. Nobody may when unset.
#[derive(Clone, Copy)]
pub struct AdminToken(pub Option<AuthToken>);

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl<S> FromRequestParts<S> for PgConn
where
    S: Sync,
    sqlx::PgPool: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(_req: &mut request::Parts, state: &S) -> Result<PgConn, Error> {
        let pool = sqlx::PgPool::from_ref(state);
        let conn = pool.acquire().await.context("acquiring db connection")?;
        Ok(PgConn(conn))
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &sqlx::PgConnection {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut sqlx::PgConnection {
        &mut self.0
    }
}

/// `Authorization: Bearer <uuid>`, the scheme being case-insensitive
fn parse_bearer(header: &http::HeaderValue) -> Option<AuthToken> {
    let (scheme, token) = header.to_str().ok()?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Uuid::try_parse(token).ok().map(AuthToken)
}

/// Bearer token, not yet checked against the session table
pub struct PreAuth(pub AuthToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        req.headers
            .get(http::header::AUTHORIZATION)
            .and_then(parse_bearer)
            .map(PreAuth)
            .ok_or_else(Error::permission_denied)
    }
}

/// Logged-in user, with everything needed to sign their comments
pub struct Auth(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for Auth
where
    S: Sync,
    sqlx::PgPool: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &S) -> Result<Auth, Error> {
        let PreAuth(token) = PreAuth::from_request_parts(req, state).await?;
        let mut conn = PgConn::from_request_parts(req, state).await?;
        let user = db::recover_session(&mut conn, token).await?;
        tracing::trace!(user = ?user.id, "authenticated request");
        Ok(Auth(user))
    }
}

/// Request carrying the admin token
pub struct AdminAuth;

#[async_trait]
impl<S> FromRequestParts<S> for AdminAuth
where
    S: Sync,
    AdminToken: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &S) -> Result<AdminAuth, Error> {
        let PreAuth(token) = PreAuth::from_request_parts(req, state).await?;
        match AdminToken::from_ref(state).0 {
            Some(admin) if admin == token => Ok(AdminAuth),
            _ => Err(Error::permission_denied()),
        }
    }
}
