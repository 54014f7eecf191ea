#![cfg(test)]

use axum::{
    extract::FromRequestParts,
    http::{self, request},
    Router,
};
use quill_api::{
    ArticleId, Comment, CommentId, Error as ApiError, NewComment, NewSession, NewUser, UserId,
};
use quill_mock_server::MockServer;
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

fn new_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed initializing tokio runtime")
}

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    new_runtime().block_on(f)
}

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(new_runtime());
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn build_pg_cluster(data: &Path) -> postgresfixture::cluster::Cluster {
    let mut best = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            let better = match &best {
                Some((_, best_version)) => *best_version < v,
                None => true,
            };
            if better {
                best = Some((r, v));
            }
        }
    }
    postgresfixture::cluster::Cluster::new(
        data,
        best.expect("postgresql seems to not be installed in path").0,
    )
}

/// Spin up a throwaway postgres cluster for the duration of `f`, which gets
/// the url of an empty database
fn with_test_db<F: FnOnce(&str)>(f: F) {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
    let lockfile = tempfile::tempfile().expect("creating tempfile");
    let datadir = tempfile::tempdir().expect("creating tempdir");
    let datadir_path: &Path = datadir.as_ref();
    let cluster = build_pg_cluster(datadir_path);
    let url = format!(
        "postgresql://?host={}&dbname=test_db",
        datadir_path.to_str().expect("tempdir is not valid utf8")
    );
    let action = AssertUnwindSafe(|| {
        cluster.createdb("test_db").expect("creating test_db database");
        f(&url)
    });
    postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), action)
        .expect("coordinating spinup and shutdown of the pg cluster");
}

async fn test_pool(url: &str) -> sqlx::PgPool {
    let pool = create_sqlx_pool(url).await.expect("creating sqlx pool");
    MIGRATOR
        .run(&pool)
        .await
        .expect("failed applying migrations");
    pool
}

async fn reset_db(pool: &sqlx::PgPool) {
    sqlx::query("TRUNCATE comments, sessions, users")
        .execute(pool)
        .await
        .expect("failed cleaning up database");
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            with_test_db(|url| {
                let runtime = AssertUnwindSafe(new_runtime());
                let pool = AssertUnwindSafe(runtime.block_on(test_pool(url)));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool: sqlx::PgPool = (*pool).clone();
                        let res = std::panic::catch_unwind(AssertUnwindSafe(|| {
                            runtime.block_on($fn(pool.clone(), v))
                        }));
                        runtime.block_on(reset_db(&pool));
                        if let Err(e) = res {
                            std::panic::resume_unwind(e);
                        }
                    });
            })
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

async fn preauth(header: Option<&str>) -> Result<AuthToken, Error> {
    let mut req = http::Request::builder().method(http::Method::GET).uri("/");
    if let Some(h) = header {
        req = req.header(http::header::AUTHORIZATION, h);
    }
    let mut req = req.body(()).expect("building request").into_parts().0;
    PreAuth::from_request_parts(&mut req, &()).await.map(|a| a.0)
}

#[test]
fn preauth_accepts_bearer_tokens() {
    block_on(async {
        let tok = Uuid::new_v4();
        assert_eq!(
            preauth(Some(format!("Bearer {tok}").as_str())).await.unwrap(),
            AuthToken(tok)
        );
        assert_eq!(
            preauth(Some(format!("bearer {tok}").as_str())).await.unwrap(),
            AuthToken(tok)
        );
        for bad in [
            None,
            Some(String::from("")),
            Some(format!("Basic {tok}")),
            Some(format!("Bearer {tok} extra")),
            Some(String::from("Bearer not-a-uuid")),
        ] {
            assert!(matches!(
                preauth(bad.as_deref()).await,
                Err(Error::Api(ApiError::PermissionDenied))
            ));
        }
    })
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        // unit responses have an empty body, which serde_json refuses
        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        return Ok(serde_json::from_slice(body).unwrap_or_else(|err| {
            panic!("failed parsing resp body ({err}), body is {body:?}, request was {req_body:?}")
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

fn json_request<Req: serde::Serialize>(
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> request::Request<axum::body::Body> {
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    req.body(axum::body::Body::from(
        serde_json::to_vec(body).expect("serializing request body to json"),
    ))
    .expect("building request")
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    call(app, json_request(method, uri, token, body), body).await
}

/// Router whose database is never reached by the requests below
fn offline_app() -> Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgresql://localhost/quill-offline-test")
        .expect("building lazy pool");
    app(pool, Some(AuthToken(Uuid::new_v4())))
}

#[test]
fn comment_submission_requires_auth() {
    block_on(async {
        let mut app = offline_app();
        let res: Result<Comment, ApiError> = run_on_app(
            &mut app,
            "POST",
            "/api/comments",
            None,
            &serde_json::json!({
                "article": Uuid::new_v4(),
                "content": "hello",
            }),
        )
        .await;
        assert_eq!(res, Err(ApiError::PermissionDenied));
    })
}

#[test]
fn user_creation_requires_admin_token() {
    block_on(async {
        let mut app = offline_app();
        let res: Result<(), ApiError> = run_on_app(
            &mut app,
            "POST",
            "/api/admin/create-user",
            Some(Uuid::new_v4()),
            &serde_json::json!({
                "id": Uuid::new_v4(),
                "name": "alice",
                "initial_password_hash": "hash",
            }),
        )
        .await;
        assert_eq!(res, Err(ApiError::PermissionDenied));
    })
}

#[test]
fn errors_become_json_responses() {
    use axum::response::IntoResponse;

    let resp = Error::unknown_parent(CommentId::from("99")).into_response();
    assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
    let body = block_on(hyper::body::to_bytes(resp.into_body())).expect("recovering resp bytes");
    assert_eq!(
        ApiError::parse(&body).unwrap(),
        ApiError::UnknownParent(CommentId::from("99"))
    );

    let resp = Error::Anyhow(anyhow::anyhow!("db exploded")).into_response();
    assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
}

fn test_user(name: &str, is_admin: bool) -> NewUser {
    NewUser {
        id: UserId(Uuid::new_v4()),
        name: String::from(name),
        // minimal cost, this is only used in tests
        initial_password_hash: bcrypt::hash(format!("{name}-password"), 4)
            .expect("hashing password"),
        is_admin,
    }
}

#[test]
fn comment_queries() {
    with_test_db(|url| {
        block_on(async {
            let pool = test_pool(url).await;
            let mut conn = pool.acquire().await.expect("acquiring connection");
            let conn = &mut *conn;

            db::create_user(conn, test_user("alice", false)).await.unwrap();
            db::create_user(conn, test_user("root", true)).await.unwrap();
            assert!(matches!(
                db::create_user(conn, test_user("alice", true)).await,
                Err(Error::Api(ApiError::NameAlreadyUsed(_)))
            ));

            let mut sessions = Vec::new();
            for name in ["alice", "root"] {
                let session = NewSession {
                    user: String::from(name),
                    password: format!("{name}-password"),
                    device: String::from("test"),
                };
                let token = db::login_user(conn, &session)
                    .await
                    .unwrap()
                    .expect("valid credentials were refused");
                sessions.push(token);
            }
            let bad = NewSession {
                user: String::from("alice"),
                password: String::from("wrong"),
                device: String::from("test"),
            };
            assert_eq!(db::login_user(conn, &bad).await.unwrap(), None);

            let alice = db::recover_session(conn, sessions[0]).await.unwrap();
            let root = db::recover_session(conn, sessions[1]).await.unwrap();
            assert_eq!(alice.name, "alice");
            assert!(!alice.is_admin);
            assert!(root.is_admin);

            let article = ArticleId(Uuid::new_v4());
            let other = ArticleId(Uuid::new_v4());
            let new = |article, content: &str, parent: Option<&CommentId>| NewComment {
                article,
                content: String::from(content),
                parent: parent.cloned(),
            };

            let top = db::submit_comment(conn, &alice, new(article, "first", None))
                .await
                .unwrap();
            let reply = db::submit_comment(conn, &root, new(article, "reply", Some(&top.id)))
                .await
                .unwrap();
            let second = db::submit_comment(conn, &alice, new(article, "second", None))
                .await
                .unwrap();
            assert_eq!(reply.parent, Some(top.id.clone()));
            assert!(reply.author.is_admin);
            assert_eq!(reply.author.id, Some(root.id));

            // parents must exist, within the same article
            assert!(matches!(
                db::submit_comment(conn, &alice, new(other, "elsewhere", Some(&top.id))).await,
                Err(Error::Api(ApiError::UnknownParent(p))) if p == top.id
            ));
            let missing = CommentId::from("missing");
            assert!(matches!(
                db::submit_comment(conn, &alice, new(article, "lost", Some(&missing))).await,
                Err(Error::Api(ApiError::UnknownParent(p))) if p == missing
            ));
            assert!(matches!(
                db::submit_comment(conn, &alice, new(article, " ", None)).await,
                Err(Error::Api(ApiError::EmptyComment))
            ));

            assert_eq!(
                db::fetch_comments(conn, article).await.unwrap(),
                vec![top, reply, second]
            );
            assert!(db::fetch_comments(conn, other).await.unwrap().is_empty());

            assert!(db::logout_user(conn, &sessions[0]).await.unwrap());
            assert!(!db::logout_user(conn, &sessions[0]).await.unwrap());
            assert!(matches!(
                db::recover_session(conn, sessions[0]).await,
                Err(Error::Api(ApiError::PermissionDenied))
            ));
        })
    })
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser {
        name: u8,
        is_admin: bool,
    },
    Auth {
        uid: usize,
    },
    Unauth {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    SubmitComment {
        /// None submits without a valid session
        sid: Option<usize>,
        article: usize,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        content: String,
        parent: Option<usize>,
    },
    FetchComments {
        article: usize,
    },
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end);
    Some(cmp::min(fuzz_id / bucket_size, end - 1))
}

#[derive(Clone, Copy)]
struct Session {
    app: AuthToken,
    mock: AuthToken,
}

/// The same comment, as known by each side
struct KnownComment {
    app: CommentId,
    mock: CommentId,
}

#[derive(Clone, Copy)]
enum Side {
    App,
    Mock,
}

/// Comment with ids replaced by their index in `ComparativeFuzzer::comments`
#[derive(Debug, PartialEq)]
struct SeenComment {
    idx: Option<usize>,
    content: String,
    author_id: Option<UserId>,
    author: String,
    is_admin: bool,
    parent: Option<usize>,
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    mock: MockServer,
    users: Vec<String>,
    sessions: Vec<Session>,
    articles: [ArticleId; 3],
    comments: Vec<KnownComment>,
}

impl ComparativeFuzzer {
    fn new(pool: sqlx::PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        ComparativeFuzzer {
            admin_token,
            app: app(pool, Some(AuthToken(admin_token))),
            mock: MockServer::new(),
            users: Vec::new(),
            sessions: Vec::new(),
            articles: [(); 3].map(|()| ArticleId(Uuid::new_v4())),
            comments: Vec::new(),
        }
    }

    fn index_of(&self, id: &CommentId, side: Side) -> Option<usize> {
        self.comments.iter().position(|k| match side {
            Side::App => k.app == *id,
            Side::Mock => k.mock == *id,
        })
    }

    fn seen(&self, c: Comment, side: Side) -> SeenComment {
        SeenComment {
            idx: self.index_of(&c.id, side),
            content: c.content,
            author_id: c.author.id,
            author: c.author.name,
            is_admin: c.author.is_admin,
            parent: c.parent.and_then(|p| self.index_of(&p, side)),
        }
    }

    fn seen_err(&self, err: ApiError, side: Side) -> ApiError {
        match err {
            ApiError::UnknownParent(p) => match self.index_of(&p, side) {
                Some(i) => ApiError::UnknownParent(CommentId(i.to_string())),
                None => ApiError::UnknownParent(p),
            },
            err => err,
        }
    }

    fn session(&self, sid: Option<usize>) -> Session {
        match sid.and_then(|s| resize_int(s, ..self.sessions.len())) {
            Some(s) => self.sessions[s],
            None => Session {
                app: AuthToken::stub(),
                mock: AuthToken::stub(),
            },
        }
    }

    async fn create_user(&mut self, name: u8, is_admin: bool) {
        let user = test_user(&format!("user{name}"), is_admin);
        // the mock does not hash passwords
        let mock_user = NewUser {
            initial_password_hash: format!("{}-password", user.name),
            ..user.clone()
        };
        let app_res: Result<(), ApiError> = run_on_app(
            &mut self.app,
            "POST",
            "/api/admin/create-user",
            Some(self.admin_token),
            &user,
        )
        .await;
        if app_res.is_ok() {
            self.users.push(user.name);
        }
        compare("CreateUser", app_res, self.mock.admin_create_user(mock_user));
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser { name, is_admin } => self.create_user(name, is_admin).await,
            FuzzOp::Auth { uid } => {
                if self.users.is_empty() {
                    self.create_user(0, false).await;
                }
                let Some(uid) = resize_int(uid, ..self.users.len()) else {
                    return;
                };
                let session = NewSession {
                    user: self.users[uid].clone(),
                    password: format!("{}-password", self.users[uid]),
                    device: String::from("fuzz"),
                };
                let app_tok: Result<AuthToken, ApiError> =
                    run_on_app(&mut self.app, "POST", "/api/auth", None, &session).await;
                let mock_tok = self.mock.auth(session);
                if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                    self.sessions.push(Session { app, mock });
                }
                compare("Auth", app_tok.map(|_| ()), mock_tok.map(|_| ()));
            }
            FuzzOp::Unauth { sid } => {
                let s = self.session(Some(sid));
                compare(
                    "Unauth",
                    run_on_app(&mut self.app, "POST", "/api/unauth", Some(s.app.0), &()).await,
                    self.mock.unauth(s.mock),
                );
            }
            FuzzOp::Whoami { sid } => {
                let s = self.session(Some(sid));
                compare(
                    "Whoami",
                    run_on_app(&mut self.app, "GET", "/api/whoami", Some(s.app.0), &()).await,
                    self.mock.whoami(s.mock),
                );
            }
            FuzzOp::SubmitComment {
                sid,
                article,
                content,
                parent,
            } => {
                let s = self.session(sid);
                let article = self.articles[article % self.articles.len()];
                let (app_parent, mock_parent) = match parent {
                    None => (None, None),
                    Some(p) => match resize_int(p, ..self.comments.len()) {
                        Some(i) => (
                            Some(self.comments[i].app.clone()),
                            Some(self.comments[i].mock.clone()),
                        ),
                        None => (Some(CommentId::from("missing")), Some(CommentId::from("missing"))),
                    },
                };
                let app_new = NewComment {
                    article,
                    content,
                    parent: app_parent,
                };
                let mock_new = NewComment {
                    parent: mock_parent,
                    ..app_new.clone()
                };
                let app_res: Result<Comment, ApiError> =
                    run_on_app(&mut self.app, "POST", "/api/comments", Some(s.app.0), &app_new)
                        .await;
                let mock_res = self.mock.submit_comment(s.mock, mock_new);
                if let (Ok(app), Ok(mock)) = (&app_res, &mock_res) {
                    self.comments.push(KnownComment {
                        app: app.id.clone(),
                        mock: mock.id.clone(),
                    });
                }
                compare(
                    "SubmitComment",
                    app_res
                        .map(|c| self.seen(c, Side::App))
                        .map_err(|e| self.seen_err(e, Side::App)),
                    mock_res
                        .map(|c| self.seen(c, Side::Mock))
                        .map_err(|e| self.seen_err(e, Side::Mock)),
                );
            }
            FuzzOp::FetchComments { article } => {
                let article = self.articles[article % self.articles.len()];
                let app_res: Result<Vec<Comment>, ApiError> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/articles/{}/comments", article.0),
                    None,
                    &(),
                )
                .await;
                let mock_res = self.mock.fetch_comments(article);
                compare(
                    "FetchComments",
                    app_res.map(|cs| cs.into_iter().map(|c| self.seen(c, Side::App)).collect()),
                    Ok(mock_res
                        .into_iter()
                        .map(|c| self.seen(c, Side::Mock))
                        .collect::<Vec<_>>()),
                );
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..50usize),
    |pool, ops: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool);
        for op in ops {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);
