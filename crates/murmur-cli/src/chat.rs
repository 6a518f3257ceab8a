//! Line-oriented chat over a single TCP connection.

use crate::config::Config;
use murmur_core::{BoxedWire, Connection};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Accept one peer on `bind` and chat with it
///
/// # Errors
///
/// Returns an error if the socket fails or the handshake is rejected.
pub async fn listen(bind: &str, config: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    println!("Listening on: {}", listener.local_addr()?);

    let (stream, peer) = listener.accept().await?;
    info!(%peer, "peer connected");
    run(stream, config).await
}

/// Connect to `addr` and chat with it
///
/// # Errors
///
/// Returns an error if the socket fails or the handshake is rejected.
pub async fn dial(addr: &str, config: &Config) -> anyhow::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    info!(peer = %stream.peer_addr()?, "connected");
    run(stream, config).await
}

async fn run(stream: TcpStream, config: &Config) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;
    let secret = config.secret()?;

    let mut connection = Connection::new(&*secret, config.connection_config()?, move || {
        Ok(Box::new(stream) as BoxedWire)
    })?;
    println!("Public key: {}", hex::encode(connection.public_key().to_bytes()));

    connection.connect().await?;
    if let Some(remote) = connection.remote_public_key() {
        println!("Peer: {}", hex::encode(remote.to_bytes()));
    }
    if let Some(authorized) = connection.authorized_capabilities() {
        println!("Authorized capabilities: {}", authorized.len());
    }
    println!("Type a line and press enter; Ctrl+D to leave.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    connection.write(line.as_bytes()).await?;
                }
                None => {
                    stdin_open = false;
                    if !config.connection.allow_half_open {
                        break;
                    }
                }
            },
            message = connection.read() => match message? {
                Some(message) => println!("< {}", String::from_utf8_lossy(&message)),
                None => {
                    println!("Peer closed the connection");
                    break;
                }
            },
        }
    }

    connection.close().await?;
    Ok(())
}
