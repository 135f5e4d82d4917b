use crate::Socket;
use crate::address::AddrSpec;
use crate::auth::AuthContext;
use crate::error::{Error, Result};
use crate::protocol::{Command, RSV, ReplyCode, Version};
use crate::relay;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Request is a parsed client request. The stream it was read from is
/// left positioned at the first payload byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: u8,
    pub command: Command,
    pub auth_context: AuthContext,
    pub remote_addr: Option<AddrSpec>,
    pub dest_addr: AddrSpec,
}

impl Request {
    /// read_from parses the request header and destination address
    pub async fn read_from<R>(stream: &mut R, auth_context: AuthContext) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        // SOCKS5 request format
        // +----+-----+-------+------+----------+----------+
        // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
        // +----+-----+-------+------+----------+----------+
        // | 1  |  1  | X'00' |  1   | Variable |    2     |
        // +----+-----+-------+------+----------+----------+

        let mut reqbuf = [0u8; 3];
        stream.read_exact(&mut reqbuf).await?;

        // Ensure version is 0x05 -> SOCKS5
        if reqbuf[0] != Version::SOCKS5 as u8 {
            return Err(Error::UnsupportedVersion(reqbuf[0]));
        }

        // Unknown commands are rejected before the address is looked at
        let command = Command::from_byte(reqbuf[1]).ok_or(Error::UnsupportedCommand(reqbuf[1]))?;

        let dest_addr = AddrSpec::read_from(stream).await?;

        Ok(Self {
            version: reqbuf[0],
            command,
            auth_context,
            remote_addr: None,
            dest_addr,
        })
    }
}

/// send_reply writes a server reply; `None` sends the all-zero IPv4 address
pub async fn send_reply<W>(
    stream: &mut W,
    reply_code: ReplyCode,
    bound_addr: Option<&AddrSpec>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut reply = vec![Version::SOCKS5 as u8, reply_code as u8, RSV];

    match bound_addr {
        Some(addr) => addr.encode(&mut reply)?,
        None => AddrSpec::unspecified().encode(&mut reply)?,
    }

    stream.write_all(&reply).await?;
    Ok(())
}

/// Connection is a freshly dialed outbound stream
pub struct Connection {
    pub stream: Box<dyn Socket>,
    pub local_addr: SocketAddr,
}

/// Dialer opens the outbound connection for CONNECT
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: SocketAddr) -> io::Result<Connection>;
}

/// TcpDialer connects directly over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, target: SocketAddr) -> io::Result<Connection> {
        let stream = TcpStream::connect(target).await?;
        let local_addr = stream.local_addr()?;

        Ok(Connection {
            stream: Box::new(stream),
            local_addr,
        })
    }
}

/// classify_dial_error maps a dial failure to the reply the client gets,
/// going by the error text
pub fn classify_dial_error(err: &io::Error) -> ReplyCode {
    let msg = err.to_string().to_lowercase();

    if msg.contains("refused") {
        ReplyCode::ConnectionRefused
    } else if msg.contains("network is unreachable") {
        ReplyCode::NetworkUnreachable
    } else {
        ReplyCode::HostUnreachable
    }
}

// ================
// CONNECT COMMAND
// ================

/// handle_connect dials the resolved destination, replies with the local
/// address of the new connection and relays until both sides close
pub async fn handle_connect<S>(mut stream: S, request: &Request, dialer: &dyn Dialer) -> Result<()>
where
    S: Socket + 'static,
{
    let Some(target) = request.dest_addr.socket_addr() else {
        send_reply(&mut stream, ReplyCode::HostUnreachable, None).await?;
        return Err(Error::InvalidAddress(format!(
            "destination {} was not resolved",
            request.dest_addr
        )));
    };

    let outbound = match dialer.dial(target).await {
        Ok(outbound) => outbound,
        Err(source) => {
            let reply = classify_dial_error(&source);
            send_reply(&mut stream, reply, None).await?;
            return Err(Error::Dial {
                dest: request.dest_addr.clone(),
                reply,
                source,
            });
        }
    };

    // Send OK reply
    let bound = AddrSpec::from(outbound.local_addr);
    send_reply(&mut stream, ReplyCode::Succeeded, Some(&bound)).await?;
    debug!("connected to {} via {}", request.dest_addr, bound);

    let (from_client, from_server) = relay::relay(stream, outbound.stream).await?;

    info!(
        "connection closed: {} bytes from client, {} bytes from server",
        from_client, from_server
    );

    Ok(())
}

// ======================
// BIND / UDP ASSOCIATE
// ======================

/// handle_unsupported answers BIND and UDP ASSOCIATE
pub async fn handle_unsupported<W>(stream: &mut W, request: &Request) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    send_reply(stream, ReplyCode::CommandNotSupported, None).await?;
    info!("{} command is not supported", request.command);
    Ok(())
}
