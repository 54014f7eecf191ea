use anyhow::{anyhow, Context};
use async_trait::async_trait;
use quill_client::{
    api::{self, ArticleId, AuthToken, Comment, NewComment},
    Backend,
};

pub struct HttpBackend {
    pub client: reqwest::Client,
    pub host: String,
    pub token: Option<AuthToken>,
}

impl HttpBackend {
    pub fn new(host: String, token: Option<AuthToken>) -> HttpBackend {
        HttpBackend {
            client: reqwest::Client::new(),
            host,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host.trim_end_matches('/'), path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> anyhow::Result<reqwest::RequestBuilder> {
        let token = self
            .token
            .ok_or_else(|| anyhow!("this command needs a session token, see the login command"))?;
        Ok(req.bearer_auth(token.0))
    }

    pub async fn post<Req, Resp>(&self, path: &str, body: &Req, auth: bool) -> anyhow::Result<Resp>
    where
        Req: serde::Serialize + ?Sized,
        Resp: for<'de> serde::Deserialize<'de>,
    {
        let mut req = self.client.post(self.url(path)).json(body);
        if auth {
            req = self.authed(req)?;
        }
        parse_response(req.send().await.with_context(|| format!("posting to {path}"))?).await
    }

    pub async fn get<Resp>(&self, path: &str, auth: bool) -> anyhow::Result<Resp>
    where
        Resp: for<'de> serde::Deserialize<'de>,
    {
        let mut req = self.client.get(self.url(path));
        if auth {
            req = self.authed(req)?;
        }
        parse_response(req.send().await.with_context(|| format!("fetching {path}"))?).await
    }
}

/// Decode a success body, or turn the server's error body back into an `api::Error`
async fn parse_response<Resp>(resp: reqwest::Response) -> anyhow::Result<Resp>
where
    Resp: for<'de> serde::Deserialize<'de>,
{
    let status = resp.status();
    let body = resp.bytes().await.context("reading response body")?;
    if !status.is_success() {
        return Err(match api::Error::parse(&body) {
            Ok(err) => anyhow::Error::new(err),
            Err(_) => anyhow!("server answered {status}"),
        });
    }
    // unit responses come back as an empty body
    let body: &[u8] = if body.is_empty() { b"null" } else { &body };
    serde_json::from_slice(body).context("parsing response body")
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_comments(&mut self, article: ArticleId) -> anyhow::Result<Vec<Comment>> {
        self.get(&format!("articles/{}/comments", article.0), false)
            .await
    }

    async fn submit_comment(&mut self, comment: NewComment) -> anyhow::Result<Comment> {
        self.post("comments", &comment, true).await
    }
}
