//! Room-based WebSocket Chat Session Client - Terminal Driver
//!
//! A minimal line-oriented front end exercising the session library:
//! lifecycle commands, chat sends, and a printer task following the
//! state snapshots.

use std::collections::BTreeSet;
use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use chat_client_v1::{RoomId, Session, SessionHandle, SessionSnapshot, WsConnector};

/// Default server URL
const DEFAULT_URL: &str = "ws://127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_client_v1=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_client_v1=info")),
        )
        .init();

    // Get server URL from command line or use default
    let url = env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());

    let handle = Session::spawn(WsConnector::new(&url)).await?;
    println!("Connected to {}", url);
    print_help();

    // Printer task: follow snapshots, print what changed
    let mut watch = handle.watch();
    tokio::spawn(async move {
        let mut printed = 0usize;
        let mut last_typing = BTreeSet::new();
        while watch.changed().await.is_ok() {
            let snap: SessionSnapshot = watch.borrow_and_update().clone();

            // A join replaced the log wholesale; start over
            if snap.messages.len() < printed {
                printed = 0;
            }
            for msg in &snap.messages[printed..] {
                if msg.is_system {
                    println!("* {} {}", msg.nickname.as_deref().unwrap_or(""), msg.body);
                } else {
                    println!("<{}> {}", msg.nickname.as_deref().unwrap_or("?"), msg.body);
                }
            }
            printed = snap.messages.len();

            if snap.typing_users != last_typing {
                if !snap.typing_users.is_empty() {
                    let names: Vec<&str> =
                        snap.typing_users.iter().map(String::as_str).collect();
                    println!("({} typing...)", names.join(", "));
                }
                last_typing = snap.typing_users.clone();
            }
        }
    });

    // Input loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if !handle_line(&handle, &line).await {
            break;
        }
    }

    Ok(())
}

/// Process one input line; returns false on /quit
async fn handle_line(handle: &SessionHandle, line: &str) -> bool {
    if let Some(rest) = line.strip_prefix("/create ") {
        match handle.create_room(rest.trim(), None).await {
            Ok(room_id) => println!("Room created - share this id: {}", room_id),
            Err(e) => error!("Create failed: {}", e),
        }
    } else if let Some(rest) = line.strip_prefix("/join ") {
        let mut parts = rest.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(nick), Some(room)) => {
                match handle.join_room(nick, RoomId::from_input(room), None).await {
                    Ok(()) => println!("Joined room {}", room),
                    Err(e) => error!("Join failed: {}", e),
                }
            }
            _ => println!("Usage: /join <nickname> <room-id>"),
        }
    } else if line == "/leave" {
        match handle.leave_room().await {
            Ok(()) => println!("Left the room"),
            Err(e) => error!("Leave failed: {}", e),
        }
    } else if line == "/reconnect" {
        match handle.reconnect().await {
            Ok(()) => println!("Reconnected"),
            Err(e) => error!("Reconnect failed: {}", e),
        }
    } else if line == "/status" {
        let snap = handle.snapshot();
        println!(
            "{:?} | room: {} | {} messages",
            snap.connection_status,
            snap.room_id
                .as_ref()
                .map(|r| r.as_str())
                .unwrap_or("(none)"),
            snap.messages.len()
        );
    } else if line == "/help" {
        print_help();
    } else if line == "/quit" {
        return false;
    } else {
        handle.notify_typing().await;
        handle.send_message(line).await;
    }
    true
}

fn print_help() {
    println!("Commands:");
    println!("  /create <nickname>          create a room and join it");
    println!("  /join <nickname> <room-id>  join an existing room");
    println!("  /leave                      leave the current room");
    println!("  /reconnect                  reconnect and rejoin");
    println!("  /status                     show session state");
    println!("  /quit                       exit");
    println!("Anything else is sent as a chat message.");
}
