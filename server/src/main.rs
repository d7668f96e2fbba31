use clap::Parser;
use futures_util::StreamExt;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;

use server::connection::{spawn_writer, Connection};
use server::registry::GameRegistry;
use server::session::Session;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(long, env = "ADDRESS", default_value = "0.0.0.0")]
    address: String,

    /// Port to listen on
    #[clap(short, long, env = "PORT", default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    // Print a message about setting RUST_LOG if not set
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let addr = format!("{}:{}", args.address, args.port);

    let listener = TcpListener::bind(&addr).await?;
    info!("Quiz server listening on {}", addr);

    let registry = GameRegistry::new();

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("New connection from {}", peer);
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    handle_connection(stream, peer, registry).await;
                });
            }
            Err(err) => {
                error!("Failed to accept connection: {}", err);
            }
        }
    }
}

/// Upgrades one TCP connection to a WebSocket, wires its serialized write
/// path, and runs the session's reader loop until the peer goes away.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, registry: Arc<GameRegistry>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            error!("WebSocket handshake with {} failed: {}", peer, err);
            return;
        }
    };
    info!("WebSocket connection established: {}", peer);

    let (sink, messages) = ws.split();
    let (conn, outbound) = Connection::new();
    spawn_writer(Arc::clone(&conn), outbound, sink);

    Session::new(conn, registry).run(messages).await;
    info!("Connection with {} closed", peer);
}
