use anyhow::Context;
use remark_api::{Comment, PostId, ServerMessage};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Print the current comments of a post
    Comments {
        /// Post whose thread to fetch
        post: String,

        /// Only list approved comments
        #[structopt(long)]
        approved: bool,
    },
}

async fn fetch_comments(
    client: &reqwest::Client,
    host: &str,
    post: &PostId,
) -> anyhow::Result<Vec<Comment>> {
    let mut url = reqwest::Url::parse(host).with_context(|| format!("parsing host {host:?}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("host {host:?} cannot be used as a base url"))?
        .pop_if_empty()
        .extend(["api", "posts", post.0.as_str(), "comments"]);
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetching comments of post {post}"))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.bytes().await.context("reading error body")?;
        match serde_json::from_slice::<ServerMessage>(&body) {
            Ok(ServerMessage::Error { code, message }) => {
                anyhow::bail!("server refused with {code} ({status}): {message}")
            }
            _ => anyhow::bail!("server refused with status {status}"),
        }
    }
    resp.json().await.context("parsing comment list")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();

    match opt.cmd {
        Command::Comments { post, approved } => {
            let post = PostId(post);
            post.validate()?;
            let comments = fetch_comments(&client, &opt.host, &post)
                .await?
                .into_iter()
                .filter(|c| c.approved || !approved)
                .collect::<Vec<_>>();
            println!(
                "{}",
                serde_json::to_string_pretty(&comments).context("formatting comments")?
            );
        }
    }

    Ok(())
}
