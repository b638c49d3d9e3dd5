use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::StreamExt;
use stomp_transport::{Message, Settings, StompError, Subscription, Transport, parse_heartbeat_header};
use tokio::sync::mpsc;
use tracing::debug;

use super::args::Cli;
use super::commands::{CommandContext, CommandResult, execute_command, print_help};
use super::exit_codes;

/// Run the interactive line client
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let settings = settings_from_args(cli)?;
    println!("Connecting to {}...", cli.address);

    let transport = Transport::connect(settings)
        .await
        .map_err(|e| format_connection_error(&e, &cli.address))?;

    let session = transport.session();
    println!(
        "Connected (STOMP {}{}).",
        session.version(),
        session
            .server()
            .map(|s| format!(", server {}", s))
            .unwrap_or_default()
    );

    let ctx = CommandContext {
        ack: cli.ack,
        receipts: cli.receipts,
    };
    let mut subscriptions: HashMap<String, Arc<Subscription>> = HashMap::new();
    for dest in &cli.subscribe {
        let line = format!("sub {}", dest);
        match execute_command(&line, &transport, &mut subscriptions, &ctx).await {
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => {
                let _ = transport.close().await;
                return Err((msg, exit_codes::PROTOCOL_ERROR));
            }
            CommandResult::Ok | CommandResult::Quit => {}
        }
    }

    // Frames no subscription claimed, and the reason the connection ends
    let conn = transport.connection().clone();
    tokio::spawn(async move {
        loop {
            match conn.recv_frame(Duration::from_secs(60)).await {
                Ok(frame) => {
                    println!("\n[{}] {} frame:", timestamp(), frame.command);
                    for (k, v) in &frame.headers {
                        println!("  {}: {}", k, v);
                    }
                    prompt();
                }
                Err(StompError::Timeout(_)) => continue,
                Err(StompError::Protocol(err)) => {
                    eprintln!("\n[BROKER ERROR] {}", err);
                    for (k, v) in &err.frame.headers {
                        eprintln!("  {}: {}", k, v);
                    }
                    break;
                }
                Err(e) => {
                    debug!("connection ended: {}", e);
                    eprintln!("\n[DISCONNECTED] {}", e);
                    break;
                }
            }
        }
    });

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        prompt();

        let line = tokio::select! {
            line = cmd_rx.recv() => match line {
                Some(l) => l,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        match execute_command(&line, &transport, &mut subscriptions, &ctx).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    println!("Disconnecting...");
    if let Err(e) = transport.close().await {
        debug!("disconnect: {}", e);
    }
    Ok(())
}

/// Print every message delivered to `sub` until it is closed.
pub fn watch_subscription(dest: String, sub: Arc<Subscription>, acknowledge: bool) {
    tokio::spawn(async move {
        let mut messages = Box::pin(sub.stream());
        while let Some(msg) = messages.next().await {
            print_message(&dest, &msg);
            if acknowledge {
                if let Err(e) = msg.accept().await {
                    eprintln!("ACK failed for {}: {}", msg.message_id(), e);
                }
            }
        }
    });
}

fn print_message(dest: &str, msg: &Message) {
    println!("\n[{}] [{}] MESSAGE received:", timestamp(), dest);
    for (k, v) in msg.headers() {
        println!("  {}: {}", k, v);
    }
    if !msg.body().is_empty() {
        match std::str::from_utf8(msg.body()) {
            Ok(s) => println!("  Body: {}", s),
            Err(_) => println!("  Body: ({} bytes, binary)", msg.body().len()),
        }
    }
    prompt();
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

fn settings_from_args(cli: &Cli) -> Result<Settings, (String, u8)> {
    let (host, port) = cli.address.rsplit_once(':').ok_or_else(|| {
        (
            format!("Invalid address '{}': expected host:port", cli.address),
            exit_codes::USAGE_ERROR,
        )
    })?;
    let port: u16 = port.parse().map_err(|_| {
        (
            format!("Invalid port in address '{}'", cli.address),
            exit_codes::USAGE_ERROR,
        )
    })?;
    let (send_ms, recv_ms) = parse_heartbeat_header(&cli.heartbeat);
    Ok(Settings::new(host, port)
        .vhost(cli.vhost.as_str())
        .credentials(cli.login.as_str(), cli.passcode.as_str())
        .heartbeat(send_ms, recv_ms))
}

/// Format a connection error with user-friendly messaging
pub fn format_connection_error(err: &StompError, address: &str) -> (String, u8) {
    match err {
        StompError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        StompError::Protocol(server_err) => (
            format!("Authentication failed: {}", server_err),
            exit_codes::AUTH_ERROR,
        ),
        StompError::Timeout(_) | StompError::ConnectionClosed(_) => (
            format!("Connection failed: {}", err),
            exit_codes::NETWORK_ERROR,
        ),
        other => (
            format!("Protocol error: {}", other),
            exit_codes::PROTOCOL_ERROR,
        ),
    }
}
