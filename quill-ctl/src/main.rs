use anyhow::Context;
use quill_client::{
    api::{self, ArticleId, AuthToken, CommentId, NewSession, UserId, Uuid},
    render::render_to_string,
    CommentThread, OrphanPolicy, RenderOptions, ReplyTarget,
};

mod http;
use http::HttpBackend;

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, env = "QUILL_HOST")]
    host: String,

    /// Session token, as printed by the login command
    #[structopt(long, env = "QUILL_TOKEN")]
    token: Option<Uuid>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
struct ThreadOpt {
    /// What to do with replies whose parent is missing: promote or drop
    #[structopt(long, default_value = "promote")]
    orphans: OrphanPolicy,

    /// Timezone used to display comment dates
    #[structopt(long, default_value = "UTC")]
    timezone: chrono_tz::Tz,

    /// Nesting level after which replies are no longer indented further
    #[structopt(long, default_value = "6")]
    max_indent: usize,
}

impl ThreadOpt {
    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            max_indent_depth: self.max_indent,
            timezone: self.timezone,
            ..RenderOptions::default()
        }
    }
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user
    CreateUser {
        /// Username
        name: String,

        /// Initial password
        initial_password: String,

        /// Give the user the admin badge
        #[structopt(long)]
        admin: bool,
    },

    /// Open a session and print its token
    Login {
        user: String,
        password: String,

        #[structopt(long, default_value = "quill-ctl")]
        device: String,
    },

    /// Close the current session
    Logout,

    /// Print the comment thread of an article
    Show {
        article: Uuid,

        #[structopt(flatten)]
        thread: ThreadOpt,
    },

    /// Comment on an article, then print its thread
    Post {
        article: Uuid,
        content: String,

        /// Id of the comment to reply to
        #[structopt(long)]
        reply_to: Option<String>,

        #[structopt(flatten)]
        thread: ThreadOpt,
    },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let mut backend = HttpBackend::new(opt.host, opt.token.map(AuthToken));

    match opt.cmd {
        Command::CreateUser {
            name,
            initial_password,
            admin,
        } => {
            backend.token = Some(admin_token()?);
            let user = api::NewUser::new(UserId(Uuid::new_v4()), name, initial_password, admin);
            user.validate()?;
            let () = backend
                .post("admin/create-user", &user, true)
                .await
                .context("creating user")?;
            println!("{}", user.id.0);
        }
        Command::Login {
            user,
            password,
            device,
        } => {
            let session = NewSession {
                user,
                password,
                device,
            };
            session.validate()?;
            let token: AuthToken = backend
                .post("auth", &session, false)
                .await
                .context("logging in")?;
            println!("{}", token.0);
        }
        Command::Logout => {
            let () = backend
                .post("unauth", &(), true)
                .await
                .context("logging out")?;
        }
        Command::Show { article, thread } => {
            let mut comments = CommentThread::new(ArticleId(article), thread.orphans);
            comments.refresh(&mut backend).await?;
            print!(
                "{}",
                render_to_string(comments.forest(), &comments.replies, &thread.render_options())
            );
        }
        Command::Post {
            article,
            content,
            reply_to,
            thread,
        } => {
            let mut comments = CommentThread::new(ArticleId(article), thread.orphans);
            comments.refresh(&mut backend).await?;
            let target = match reply_to {
                None => ReplyTarget::Article,
                Some(id) => ReplyTarget::Comment(CommentId(id)),
            };
            comments.replies.toggle(target.clone());
            comments.replies.edit(&target, content);
            let created = comments.submit(&mut backend, &target).await?;
            tracing::info!(comment = %created.id, "comment posted");
            print!(
                "{}",
                render_to_string(comments.forest(), &comments.replies, &thread.render_options())
            );
        }
    }

    Ok(())
}
