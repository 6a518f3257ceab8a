//! Two-peer test fixture
//!
//! Builds a pair of [`Connection`]s that share a secret and a transport
//! pipe, either an in-process duplex or a loopback TCP socket.
//!
//! # Example
//!
//! ```no_run
//! use murmur_integration_tests::fixtures::TwoPeerFixture;
//!
//! #[tokio::test]
//! async fn test_basic_exchange() {
//!     let mut fixture = TwoPeerFixture::new();
//!     fixture.establish().await;
//!
//!     fixture.alice.write(b"hello bob").await.unwrap();
//!     assert_eq!(fixture.bob.read().await.unwrap().unwrap(), b"hello bob");
//!
//!     fixture.cleanup().await;
//! }
//! ```

use murmur_core::{BoxedWire, Connection, ConnectionConfig, Result};
use std::io;
use tokio::net::{TcpListener, TcpStream};

/// Duplex buffer used for in-process pipes
const PIPE_CAPACITY: usize = 256 * 1024;

/// Fresh random shared secret
pub fn random_secret() -> [u8; 32] {
    murmur_crypto::random::random_32().unwrap()
}

/// A pair of connections wired to each other
pub struct TwoPeerFixture {
    pub alice: Connection,
    pub bob: Connection,
}

impl TwoPeerFixture {
    /// Two peers with default configuration over an in-process pipe
    pub fn new() -> Self {
        Self::with_configs(ConnectionConfig::default(), ConnectionConfig::default())
    }

    /// Two peers with custom configurations over an in-process pipe
    pub fn with_configs(alice: ConnectionConfig, bob: ConnectionConfig) -> Self {
        let secret = random_secret();
        Self::with_secrets(&secret, &secret, alice, bob)
    }

    /// Two peers that may disagree on the shared secret
    pub fn with_secrets(
        alice_secret: &[u8],
        bob_secret: &[u8],
        alice: ConnectionConfig,
        bob: ConnectionConfig,
    ) -> Self {
        let (wire_a, wire_b) = tokio::io::duplex(PIPE_CAPACITY);
        Self {
            alice: Connection::new(alice_secret, alice, move || Ok(Box::new(wire_a) as BoxedWire))
                .unwrap(),
            bob: Connection::new(bob_secret, bob, move || Ok(Box::new(wire_b) as BoxedWire))
                .unwrap(),
        }
    }

    /// Two peers over a loopback TCP connection
    ///
    /// # Errors
    ///
    /// Returns an error if the loopback socket cannot be set up.
    pub async fn over_tcp(alice: ConnectionConfig, bob: ConnectionConfig) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let dialed = dialed?;
        let (accepted, _) = accepted?;

        let secret = random_secret();
        Ok(Self {
            alice: Connection::new(&secret, alice, move || Ok(Box::new(dialed) as BoxedWire))
                .map_err(io::Error::other)?,
            bob: Connection::new(&secret, bob, move || Ok(Box::new(accepted) as BoxedWire))
                .map_err(io::Error::other)?,
        })
    }

    /// Run `connect` on both peers concurrently
    pub async fn connect(&mut self) -> (Result<()>, Result<()>) {
        tokio::join!(self.alice.connect(), self.bob.connect())
    }

    /// Connect both peers, panicking if either fails
    pub async fn establish(&mut self) {
        let (alice, bob) = self.connect().await;
        alice.expect("alice failed to connect");
        bob.expect("bob failed to connect");
    }

    /// Close both peers
    pub async fn cleanup(&mut self) {
        let _ = self.alice.close().await;
        let _ = self.bob.close().await;
    }
}

impl Default for TwoPeerFixture {
    fn default() -> Self {
        Self::new()
    }
}
