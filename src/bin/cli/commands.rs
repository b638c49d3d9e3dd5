use std::collections::HashMap;
use std::sync::Arc;

use stomp_transport::{AckMode, Subscription, Transport};

use super::plain::watch_subscription;

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Informational output
    Info(String),
    /// Error executing command
    Error(String),
}

/// Options that apply to every command in a session
pub struct CommandContext {
    pub ack: Option<AckMode>,
    pub receipts: bool,
}

/// Parse and execute a command
pub async fn execute_command(
    line: &str,
    transport: &Transport,
    subscriptions: &mut HashMap<String, Arc<Subscription>>,
    ctx: &CommandContext,
) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            let dest = parts[1];
            let msg = parts[2];
            match transport
                .send(dest, "text/plain", msg, Vec::new(), ctx.receipts)
                .await
            {
                Ok(()) if ctx.receipts => CommandResult::Info(format!("Sent to {} (confirmed)", dest)),
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            let dest = parts[1];
            if subscriptions.contains_key(dest) {
                return CommandResult::Error(format!("Already subscribed to {}", dest));
            }
            match transport.subscribe(dest, ctx.ack).await {
                Ok(sub) => {
                    watch_subscription(dest.to_string(), sub.clone(), ctx.ack.is_some_and(|m| m != AckMode::Auto));
                    subscriptions.insert(dest.to_string(), sub);
                    CommandResult::Info(format!("Subscribed to: {}", dest))
                }
                Err(e) => CommandResult::Error(format!("Failed to subscribe to '{}': {}", dest, e)),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <destination>".to_string());
            }
            let dest = parts[1];
            let Some(sub) = subscriptions.remove(dest) else {
                return CommandResult::Error(format!("Not subscribed to {}", dest));
            };
            match transport.unsubscribe(&sub).await {
                Ok(()) => CommandResult::Info(format!("Unsubscribed from: {}", dest)),
                Err(e) => CommandResult::Error(format!("Failed to unsubscribe from '{}': {}", dest, e)),
            }
        }

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", parts[0])),
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <destination>           - Unsubscribe from a destination");
    println!("  quit                          - Exit");
}
