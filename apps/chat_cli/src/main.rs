use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use room_sync::{
    BadgeSink, BackoffPolicy, HttpChatBackend, NoopBadgeSink, RoomSession, SessionEvent,
    SessionOptions, WebSocketPushConnector,
};
use shared::{
    domain::{MessageId, RoomId, SenderRef, ViewerId},
    protocol::MessageRecord,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod config;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    room: i64,
    #[arg(long)]
    viewer_id: i64,
    #[arg(long)]
    display_name: String,
    /// Overrides chat.toml / CHAT_SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
}

struct PrintingBadgeSink;

impl BadgeSink for PrintingBadgeSink {
    fn message_arrived(&self, message: &MessageRecord) {
        info!(
            room_id = message.room_id.0,
            message_id = message.message_id.0,
            "unread badge bump"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let backend = Arc::new(HttpChatBackend::new(
        settings.server_url.clone(),
        settings.token.clone(),
    ));
    let connector = Arc::new(WebSocketPushConnector::new(settings.server_url));
    let badge: Arc<dyn BadgeSink> = if std::env::var("CHAT_QUIET").is_ok() {
        Arc::new(NoopBadgeSink)
    } else {
        Arc::new(PrintingBadgeSink)
    };

    let session = RoomSession::open(
        backend,
        connector,
        badge,
        SessionOptions {
            room_id: RoomId(args.room),
            viewer: SenderRef::new(ViewerId(args.viewer_id), args.display_name),
            token: settings.token,
            backoff: BackoffPolicy::default(),
        },
    )
    .await?;

    for message in session.messages().await {
        println!(
            "[{}] {}: {}",
            message.created_at.format("%H:%M"),
            message.sender.display_name,
            message.body
        );
    }

    let mut events = session.subscribe_events();
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    SessionEvent::MessagesChanged => {
                        if let Some(last) = session.messages().await.last() {
                            println!(
                                "[{}] {}: {}",
                                last.created_at.format("%H:%M"),
                                last.sender.display_name,
                                last.body
                            );
                        }
                    }
                    SessionEvent::TypingChanged(names) if !names.is_empty() => {
                        println!("({} typing...)", names.join(", "));
                    }
                    SessionEvent::ConnectionChanged(state) => {
                        println!("(connection: {state:?})");
                    }
                    // Mutation failures are reported inline by the command
                    // loop below.
                    _ => {}
                }
            }
        });
    }

    println!("commands: /edit <id> <text> | /delete <id> | /react <id> <emoji> | /pin <id> | /pinroom | /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        session.notify_typing().await;
        let outcome = match line.split_once(' ') {
            _ if line == "/quit" => break,
            _ if line == "/pinroom" => session.toggle_room_pin().await,
            Some(("/edit", rest)) => match rest.split_once(' ') {
                Some((id, text)) => match id.parse::<i64>() {
                    Ok(id) => session.edit_message(MessageId(id), text).await,
                    Err(_) => {
                        println!("usage: /edit <id> <text>");
                        continue;
                    }
                },
                None => {
                    println!("usage: /edit <id> <text>");
                    continue;
                }
            },
            Some(("/delete", id)) => match id.trim().parse::<i64>() {
                Ok(id) => session.delete_message(MessageId(id)).await,
                Err(_) => {
                    println!("usage: /delete <id>");
                    continue;
                }
            },
            Some(("/react", rest)) => match rest.split_once(' ') {
                Some((id, emoji)) => match id.parse::<i64>() {
                    Ok(id) => session.toggle_reaction(MessageId(id), emoji.trim()).await,
                    Err(_) => {
                        println!("usage: /react <id> <emoji>");
                        continue;
                    }
                },
                None => {
                    println!("usage: /react <id> <emoji>");
                    continue;
                }
            },
            Some(("/pin", id)) => match id.trim().parse::<i64>() {
                Ok(id) => session.toggle_message_pin(MessageId(id)).await,
                Err(_) => {
                    println!("usage: /pin <id>");
                    continue;
                }
            },
            _ => session.send_message(&line, None).await,
        };
        if let Err(err) = outcome {
            println!("(error: {err})");
        }
    }

    session.close().await;
    Ok(())
}
