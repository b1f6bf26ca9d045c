//! Basic usage example for the Parley chat service
//!
//! Starts a server on an ephemeral port, connects two clients, and walks
//! through the full sign-up / login / join / chat flow.
//!
//! Run with: cargo run --example basic_usage

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use parley::{ChatClient, ChatServer, ClientConfig, ClientEvent, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Start a server on an ephemeral port
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse()?,
    };
    let server = Arc::new(ChatServer::bind(&config).await?);
    let addr = server.local_addr()?;

    let run_server = Arc::clone(&server);
    let server_task = tokio::spawn(async move { run_server.run().await });

    let client_config = ClientConfig {
        server_addr: addr,
        ..Default::default()
    };

    // Alice registers, logs in, and joins a room
    let mut alice = ChatClient::new(client_config.clone());
    let _alice_events = alice.connect().await?;
    info!("alice: {:?}", alice.sign_up("alice", "wonderland").await?);
    info!("alice: {:?}", alice.login("alice", "wonderland").await?);
    info!("alice: {:?}", alice.join_room("general").await?);

    // Bob does the same
    let mut bob = ChatClient::new(client_config);
    let mut bob_events = bob.connect().await?;
    info!("bob: {:?}", bob.sign_up("bob", "builder").await?);
    info!("bob: {:?}", bob.login("bob", "builder").await?);
    info!("bob: {:?}", bob.join_room("general").await?);

    // Alice says hello; Bob receives the push
    info!("alice: {:?}", alice.send_chat("Hello everyone!").await?);
    loop {
        match tokio::time::timeout(Duration::from_secs(2), bob_events.recv()).await? {
            Some(ClientEvent::MessageReceived {
                sender,
                room,
                content,
            }) => {
                info!("bob saw [{}] {}: {}", room, sender, content);
                break;
            }
            Some(other) => info!("bob event: {:?}", other),
            None => break,
        }
    }

    // Tear everything down
    alice.disconnect();
    bob.disconnect();
    server.shutdown();
    server_task.await??;

    Ok(())
}
