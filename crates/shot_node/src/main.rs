mod cli;
mod logging;

use anyhow::Context;
use clap::Parser;
use shot_network::payload::{ChatPayload, KnowledgeUpdatePayload};
use shot_network::{Message, MessageKind, Node, SendStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::cli::{Args, ConsoleCommand};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

fn print_message(message: &Message) {
    match &message.kind {
        MessageKind::ChatMessage => match ChatPayload::parse(&message.payload) {
            Ok(chat) => println!("[{}] {}", message.sender_id, chat.text),
            Err(e) => warn!("Unreadable chat from {}: {e}", message.sender_id),
        },
        MessageKind::KnowledgeUpdate => match KnowledgeUpdatePayload::parse(&message.payload) {
            Ok(knowledge) => println!(
                "[knowledge from {}] codex: {}, nodes: {}, resources: {}",
                message.sender_id,
                knowledge.codex.join(", "),
                knowledge.known_nodes.join(", "),
                knowledge.resources.join(", ")
            ),
            Err(e) => warn!("Unreadable knowledge update from {}: {e}", message.sender_id),
        },
        other => println!("[{other} from {}] {}", message.sender_id, message.payload),
    }
}

/// Run one console command. Returns `false` when the user asked to quit.
async fn run_command(node: &Node, command: ConsoleCommand) -> anyhow::Result<bool> {
    match command {
        ConsoleCommand::Empty => {}
        ConsoleCommand::Quit => return Ok(false),
        ConsoleCommand::Peers => {
            let peers = node.peers();
            if peers.is_empty() {
                println!("no known peers");
            }
            for peer in peers {
                println!(
                    "{} at {} (last seen {}, {})",
                    peer.peer_id,
                    peer.address(),
                    peer.last_seen.format("%H:%M:%S"),
                    peer.capabilities.join(", ")
                );
            }
        }
        ConsoleCommand::Resources => {
            let resources = node.resources().list(None);
            if resources.is_empty() {
                println!("no known resources");
            }
            for resource in resources {
                println!(
                    "{} [{}] from {}: {}",
                    resource.id, resource.resource_type, resource.source, resource.data
                );
            }
        }
        ConsoleCommand::Send { peer, text } => {
            let status = node
                .send(&peer, MessageKind::ChatMessage, ChatPayload::new(text).into_value())
                .await?;
            match status {
                SendStatus::Delivered => println!("sent to {peer}"),
                SendStatus::Failed(e) => println!("send to {peer} failed: {e}"),
            }
        }
        ConsoleCommand::Share {
            resource_type,
            data,
        } => {
            let (resource_id, report) = node.share_resource(resource_type, data).await?;
            println!("shared {resource_id} with {} peers", report.delivered);
        }
        ConsoleCommand::Chat(text) => {
            let report = node.send_chat(text).await?;
            if !report.failed.is_empty() {
                warn!("Chat not delivered to {} peers", report.failed.len());
            }
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init_logging(args.log_dir.as_deref())?;
    info!("Starting shotnet v{VERSION}");

    let mut node = Node::new(args.identity(), args.network_config());
    let mut inbox = node.take_inbox().context("Inbound queue already taken")?;

    let addr = node.start().await.context("Failed to start node")?;
    info!("Node {} listening on {addr}", node.peer_id());

    let bootstrap = node.config().bootstrap_peers.clone();
    if !bootstrap.is_empty() {
        match node.discover(&bootstrap).await {
            Ok(report) => info!(
                "Announced to {} bootstrap peers ({} unreachable)",
                report.delivered,
                report.failed.len()
            ),
            Err(e) => warn!("Discovery failed: {e}"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                    Ok(command) => match run_command(&node, command).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => error!("Command failed: {e:#}"),
                    },
                    Err(usage) => println!("{usage}"),
                },
                Ok(None) => {
                    info!("Console closed; running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Console read failed: {e}");
                    stdin_open = false;
                }
            },
            Some(message) = inbox.recv() => print_message(&message),
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    node.stop().await;
    Ok(())
}
