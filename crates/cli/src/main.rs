//! Overlay Chat - terminal client for the chat gateway.
//!
//! Reads lines from stdin and sends them as chat messages. Lines starting
//! with `/` are commands; `/help` lists them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use overlay_chat_client::{
    GatewayClient, GatewayConfig, GatewaySnapshot, ImageRef, InboundMessage, MessageKind,
};

/// Time allowed for the goodbye packet before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

const HELP: &str = "\
commands:
  /status                   connection state, participants and time left
  /image <path> [caption]   send an image file
  /reconnect                reconnect with the current token
  /disconnect               close the connection
  /quit                     exit
anything else is sent as a text message";

#[derive(Debug, Parser)]
#[command(name = "overlay-chat", version, about = "Terminal client for the chat gateway")]
struct Cli {
    /// Handshake token; prompted for when absent
    #[arg(long, env = "CHAT_GATEWAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Gateway address (overrides CHAT_GATEWAY_URL)
    #[arg(long)]
    url: Option<Url>,

    /// Socket path on the gateway (overrides CHAT_GATEWAY_PATH)
    #[arg(long)]
    path: Option<String>,

    /// Where received images are written (overrides CHAT_IMAGE_DIR)
    #[arg(long)]
    image_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overlay_chat=info,overlay_chat_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    if let Some(url) = cli.url {
        config.base_url = url;
    }
    if let Some(path) = cli.path {
        config.path = path;
    }
    if let Some(dir) = cli.image_dir {
        config.image_dir = dir;
    }
    tracing::info!(
        url = %config.base_url,
        path = %config.path,
        image_dir = %config.image_dir.display(),
        "starting overlay chat"
    );

    let client = GatewayClient::new(config).context("failed to create gateway client")?;
    client.set_on_message(print_message);
    tokio::spawn(watch_state(client.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let Some(mut token) = obtain_token(&client, cli.token, &mut lines).await? else {
        return Ok(());
    };

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/help", _) => println!("{HELP}"),
            ("/status", _) => print_status(&client.snapshot()),
            ("/disconnect", _) => client.disconnect(),
            ("/reconnect", rest) => {
                if !rest.trim().is_empty() {
                    token = rest.trim().to_string();
                }
                client.connect(&token);
            }
            ("/image", rest) => send_image(&client, rest).await,
            (command, _) if command.starts_with('/') => {
                println!("unknown command {command}, try /help")
            }
            _ => {
                if !client.is_connected() {
                    println!("(not connected, message not sent)");
                }
                client.send_text(line);
            }
        }
    }

    client.disconnect();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}

/// Connect with the token from the command line or environment, prompting
/// until a non-blank one is entered. `None` when stdin closes first.
async fn obtain_token(
    client: &GatewayClient,
    token: Option<String>,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<Option<String>> {
    if let Some(token) = token {
        if client.connect(&token) {
            return Ok(Some(token.trim().to_string()));
        }
        println!("the configured token is blank");
    }

    loop {
        println!("token:");
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            return Ok(None);
        };
        if client.connect(&line) {
            return Ok(Some(line.trim().to_string()));
        }
        println!("the token must not be empty");
    }
}

async fn send_image(client: &GatewayClient, args: &str) {
    let (path, caption) = args.trim().split_once(' ').unwrap_or((args.trim(), ""));
    if path.is_empty() {
        println!("usage: /image <path> [caption]");
        return;
    }
    if !client.is_connected() {
        println!("(not connected, image not sent)");
    }
    let caption = Some(caption.trim()).filter(|c| !c.is_empty());
    if let Err(e) = client.send_image_file(path, caption).await {
        println!("{e}");
    }
}

async fn watch_state(mut snapshots: tokio::sync::watch::Receiver<GatewaySnapshot>) {
    let mut last = snapshots.borrow_and_update().clone();
    while snapshots.changed().await.is_ok() {
        let current = snapshots.borrow_and_update().clone();
        if current.state != last.state {
            println!("[{}]", current.state);
        }
        if current.last_error != last.last_error {
            if let Some(error) = &current.last_error {
                println!("[{error}]");
            }
        }
        if current.reconnect_attempt > last.reconnect_attempt {
            println!("[reconnect attempt {}]", current.reconnect_attempt);
        }
        last = current;
    }
}

fn print_status(snapshot: &GatewaySnapshot) {
    println!(
        "{} | {} participant(s) | {} left",
        snapshot.state,
        snapshot.presence.participant_count,
        snapshot.presence.format_remaining()
    );
    if let Some(error) = &snapshot.last_error {
        println!("last error: {error}");
    }
}

fn print_message(message: InboundMessage) {
    let sender = &message.sender_name;
    match (message.kind, &message.image_ref) {
        (MessageKind::Image, Some(image)) => {
            let location = match image {
                ImageRef::File { path, .. } => path.display().to_string(),
                ImageRef::Remote { url } => url.clone(),
            };
            match &message.text_content {
                Some(caption) => println!("{sender}: [image {location}] {caption}"),
                None => println!("{sender}: [image {location}]"),
            }
        }
        _ => println!(
            "{sender}: {}",
            message.text_content.as_deref().unwrap_or_default()
        ),
    }
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // local overrides first; dotenvy never overwrites a variable already set
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
