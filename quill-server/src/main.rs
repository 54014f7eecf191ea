use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use quill_api::{AuthToken, Uuid};

mod db;
mod error;
mod extractors;
mod handlers;

#[cfg(test)]
mod fuzz;

use error::Error;
use extractors::{AdminToken, AppState};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(structopt::StructOpt)]
struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Token allowing the bearer to create users, admin routes are disabled when unset
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub fn app(db: sqlx::PgPool, admin_token: Option<AuthToken>) -> Router {
    let state = AppState {
        db,
        admin_token: AdminToken(admin_token),
    };
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route(
            "/api/articles/:article/comments",
            get(handlers::fetch_comments),
        )
        .route("/api/comments", post(handlers::submit_comment))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let db = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&db)
        .await
        .context("running pending migrations")?;

    if opt.admin_token.is_none() {
        tracing::warn!("no ADMIN_TOKEN set, user creation is disabled");
    }
    let app = app(db, opt.admin_token.map(AuthToken));

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
