//! Chat server binary
//!
//! Runs the TCP chat server together with the operator console bridge.
//! Lines typed on stdin are broadcast to chat rooms: `@room text` targets
//! one room, anything else goes to every room.
//!
//! Usage:
//!   cargo run -- server                    # Run on the default port
//!   cargo run -- server --port 4040        # Run on a specific port

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tracing::info;

use parley::server::console;
use parley::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            let bind_addr = parse_bind_addr(&args);
            run_server(bind_addr).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Parley - TCP Chat Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --host <HOST>       Address to listen on (default: 127.0.0.1)");
    println!("    --port <PORT>       Port to listen on (default: 4040)");
    println!();
    println!("CONSOLE:");
    println!("    Lines typed on stdin are broadcast to chat rooms:");
    println!("    @room text          Send to one room");
    println!("    text                Send to every room");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_bind_addr(args: &[String]) -> SocketAddr {
    let mut host = "127.0.0.1".to_string();
    let mut port = 4040u16;
    for i in 0..args.len() {
        if args[i] == "--host" && i + 1 < args.len() {
            host = args[i + 1].clone();
        }
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(parsed) = args[i + 1].parse() {
                port = parsed;
            }
        }
    }
    format!("{}:{}", host, port)
        .parse()
        .unwrap_or_else(|_| ServerConfig::default().bind_addr)
}

async fn run_server(bind_addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig { bind_addr };
    let server = Arc::new(ChatServer::bind(&config).await?);

    // operator console on stdin
    let console_rooms = server.rooms();
    let console_shutdown = server.subscribe_shutdown();
    tokio::spawn(async move {
        console::run(
            BufReader::new(tokio::io::stdin()),
            console_rooms,
            console_shutdown,
        )
        .await;
    });

    // ctrl-c triggers graceful shutdown
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
