//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT (BIND and UDP ASSOCIATE are answered with "command not supported")
//!     - No Authentication
//!     - Username/Password Authentication
//!     - Pluggable name resolution, command rules and outbound dialing
//!     - Optional AES-CBC tunnel between a local client and the proxy
//!     - Async using tokio, one task per connection, half-close aware relay
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! # Example
//! ```no_run
//! use minisocks::{Socks5Server, auth::StaticCredentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let creds = StaticCredentials::from_iter([("foo", "bar")]);
//!     let mut server = Socks5Server::new("127.0.0.1:1080").with_credentials(Some(creds));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

pub mod address;
pub mod auth;
pub mod cipher;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod rules;
pub mod server;
pub mod tunnel;

// Re-export main types at crate root for convenience
pub use address::AddrSpec;
pub use auth::{AuthContext, Authenticator, NoAuthAuthenticator, UserPassAuthenticator};
pub use cipher::{Cipher, CipherKey, CipherTransport};
pub use engine::ProtocolEngine;
pub use error::{Error, Result};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use server::Socks5Server;
pub use tunnel::TunnelClient;

/// Socket is any duplex byte stream the proxy can serve: a TcpStream,
/// the plain side of a cipher tunnel, or an in-memory pipe.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Unpin + Send {}
