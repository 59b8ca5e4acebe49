use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cm_chat::{ChatClient, ChatConfig, ConversationView, DirectoryState};
use cm_proto::{room_id, Message, MessageContent, UserId};

const DEFAULT_LOG_FILTER: &str = "cm_chat=info,cm_crypto=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Campus Messenger terminal client", long_about = None)]
struct Cli {
    #[command(flatten)]
    conn: Connection,
    #[command(subcommand)]
    command: Commands,
}

/// Every flag falls back to its environment variable.
#[derive(Args, Debug)]
struct Connection {
    #[arg(long, global = true, env = "CM_API_URL")]
    api_url: Option<String>,
    #[arg(long, global = true, env = "CM_SOCKET_URL")]
    socket_url: Option<String>,
    #[arg(long, global = true, env = "CM_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long, global = true, env = "CM_USER_ID")]
    user_id: Option<String>,
    #[arg(long, global = true, env = "CM_USERNAME")]
    username: Option<String>,
    /// file | keyring | memory
    #[arg(long, global = true, env = "CM_SECRET_BACKEND")]
    secret_backend: Option<String>,
    /// never | backoff
    #[arg(long, global = true, env = "CM_RECONNECT")]
    reconnect: Option<String>,
}

impl Connection {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "CM_API_URL" => self.api_url.clone(),
            "CM_SOCKET_URL" => self.socket_url.clone(),
            "CM_ACCESS_TOKEN" => self.token.clone(),
            "CM_USER_ID" => self.user_id.clone(),
            "CM_USERNAME" => self.username.clone(),
            "CM_SECRET_BACKEND" => self.secret_backend.clone(),
            "CM_RECONNECT" => self.reconnect.clone(),
            _ => None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the room id two users share
    RoomId { a: i64, b: i64 },
    /// Print this device's master secret fingerprint
    Fingerprint,
    /// List recent conversations
    Recent {
        /// Only rows whose name contains this text
        #[arg(long)]
        filter: Option<String>,
    },
    /// List users you can message
    Users,
    /// Open a conversation and chat from stdin (/read, /reload, /quit)
    Open {
        #[arg(long)]
        peer: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::RoomId { a, b } = cli.command {
        println!("{}", room_id(parse_user(a)?, parse_user(b)?));
        return Ok(());
    }

    let config = ChatConfig::from_lookup(|key| cli.conn.lookup(key))?;
    let client = ChatClient::from_config(config)?;

    match cli.command {
        Commands::RoomId { .. } => Ok(()),
        Commands::Fingerprint => {
            println!("{}", client.secret_fingerprint().await?);
            Ok(())
        }
        Commands::Recent { filter } => recent_command(&client, filter.as_deref()).await,
        Commands::Users => users_command(&client).await,
        Commands::Open { peer } => open_command(&client, parse_user(peer)?).await,
    }
}

fn parse_user(raw: i64) -> Result<UserId> {
    UserId::new(raw).ok_or_else(|| anyhow!("user id must be positive, got {raw}"))
}

async fn recent_command(client: &ChatClient, filter: Option<&str>) -> Result<()> {
    let directory = client.directory();
    directory.refresh().await.context("loading recent conversations")?;
    if let DirectoryState::Empty = directory.state() {
        println!("No conversations yet.");
        return Ok(());
    }
    for row in directory.filter(filter.unwrap_or("")) {
        let preview = row.last_message.as_ref().map(|m| m.content.as_str()).unwrap_or("");
        let unread = if row.unread_count > 0 {
            format!(" ({} unread)", row.unread_count)
        } else {
            String::new()
        };
        println!("{:<8} {}{}  {}", row.room_id, row.counterpart.display_name(), unread, preview);
    }
    Ok(())
}

async fn users_command(client: &ChatClient) -> Result<()> {
    for user in client.users().await? {
        let status = if user.online { "online" } else { "offline" };
        println!("{:>6}  {:<24} {}", user.id, user.display_name(), status);
    }
    Ok(())
}

async fn open_command(client: &ChatClient, peer: UserId) -> Result<()> {
    let view = client.open_conversation(peer).await?;
    let name = match view.counterpart().await {
        Ok(profile) => profile.user.display_name().to_string(),
        Err(e) => {
            tracing::warn!(target: "cm_chat", error = %e, "counterpart profile unavailable");
            format!("user {peer}")
        }
    };
    let me = client.identity().user_id;

    println!("── {name} ({}) ──", view.room());
    for message in view.messages() {
        print_message(&message, me, &name);
    }

    let mut updates = view.subscribe();
    let label = name.clone();
    let printer = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(message) => print_message(&message, me, &label),
                Err(RecvError::Lagged(n)) => eprintln!("({n} messages skipped, /reload to catch up)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/read" => report(view.mark_all_read().await),
            "/reload" => reload(&view, me, &name).await,
            "" => {}
            text => report(view.send(text).await),
        }
    }

    printer.abort();
    client.close_conversation().await;
    Ok(())
}

async fn reload(view: &ConversationView, me: UserId, name: &str) {
    match view.reload().await {
        Ok(_) => {
            for message in view.messages() {
                print_message(&message, me, name);
            }
        }
        Err(e) => eprintln!("! {e}"),
    }
}

fn report(result: Result<(), cm_chat::ChatError>) {
    if let Err(e) = result {
        eprintln!("! {e}");
    }
}

fn print_message(message: &Message, me: UserId, peer_name: &str) {
    let who = if message.is_inbound(me) { peer_name } else { "me" };
    let time = message.timestamp.format("%H:%M");
    match &message.content {
        MessageContent::Text { body } => println!("[{time}] {who}: {body}"),
        MessageContent::System { body } => println!("[{time}] * {body}"),
        MessageContent::Image(a) | MessageContent::File(a) => {
            let kind = message.content.kind().as_str();
            let link = a.url.as_deref().or(a.file_name.as_deref()).unwrap_or("");
            println!("[{time}] {who}: [{kind}] {} {link}", a.caption);
        }
    }
}
