//! Error types for the proxy.

use crate::address::AddrSpec;
use crate::protocol::{Command, ReplyCode};
use std::io;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised while serving a SOCKS5 connection or running the tunnel.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The peer spoke a SOCKS version other than 5.
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// None of the methods offered by the client is configured.
    #[error("no supported authentication mechanism")]
    NoSupportedAuth,

    /// The username/password sub-negotiation used a version other than 1.
    #[error("unsupported auth version: {0}")]
    UnsupportedAuthVersion(u8),

    /// The supplied username/password did not match.
    #[error("user authentication failed")]
    AuthenticationFailed,

    /// The ATYP byte of a request was not 1, 3 or 4.
    #[error("unrecognized address type: {0}")]
    UnrecognizedAddressType(u8),

    /// The CMD byte of a request was not CONNECT, BIND or UDP ASSOCIATE.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    /// An address could not be decoded or encoded.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The rule set refused the request.
    #[error("{command} to {dest} blocked by rules")]
    RuleDenied { command: Command, dest: AddrSpec },

    /// Name resolution failed.
    #[error("failed to resolve destination '{domain}': {source}")]
    Resolve {
        domain: String,
        #[source]
        source: io::Error,
    },

    /// Connecting to the destination failed; `reply` is what the client was told.
    #[error("connect to {dest} failed ({reply:?}): {source}")]
    Dial {
        dest: AddrSpec,
        reply: ReplyCode,
        #[source]
        source: io::Error,
    },

    /// I/O failure while relaying payload bytes.
    #[error("relay error: {0}")]
    Relay(#[source] io::Error),

    /// Key construction, encryption or decryption failed.
    #[error("cipher error: {0}")]
    Cipher(String),

    /// The sink stopped accepting bytes before a whole frame was written.
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    /// Invalid server or tunnel configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other I/O failure on the client connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a new cipher error
    pub fn cipher(msg: impl Into<String>) -> Self {
        Error::Cipher(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
