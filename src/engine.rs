use crate::Socket;
use crate::address::AddrSpec;
use crate::auth::{self, Authenticator};
use crate::commands::{self, Dialer, Request, TcpDialer, send_reply};
use crate::error::{Error, Result};
use crate::protocol::{Command, ReplyCode};
use crate::resolver::{DnsResolver, NameResolver};
use crate::rules::{PermitCommand, RuleSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// ProtocolEngine serves one client connection end to end:
/// negotiation, authentication, request parsing, resolution, policy,
/// dispatch and relay. It holds only shared, read-only collaborators;
/// all per-connection state lives on the stack of `handle`
#[derive(Clone)]
pub struct ProtocolEngine {
    authenticators: Vec<Arc<dyn Authenticator>>,
    resolver: Arc<dyn NameResolver>,
    rules: Arc<dyn RuleSet>,
    dialer: Arc<dyn Dialer>,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self {
            authenticators: Vec::new(),
            resolver: Arc::new(DnsResolver),
            rules: Arc::new(PermitCommand::permit_all()),
            dialer: Arc::new(TcpDialer),
        }
    }
}

impl ProtocolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// with_authenticator adds a method the client may pick
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticators.push(Arc::new(authenticator));
        self
    }

    pub fn with_resolver(mut self, resolver: impl NameResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_rules(mut self, rules: impl RuleSet + 'static) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    /// handle runs the full SOCKS5 exchange on one client stream
    pub async fn handle<S>(&self, mut stream: S, peer_addr: Option<SocketAddr>) -> Result<()>
    where
        S: Socket + 'static,
    {
        // Negotiate authentication with client
        let auth_context = auth::negotiate_auth(&mut stream, &self.authenticators).await?;

        let mut request = match Request::read_from(&mut stream, auth_context).await {
            Ok(request) => request,
            Err(e @ Error::UnrecognizedAddressType(_)) => {
                send_reply(&mut stream, ReplyCode::AddrTypeNotSupported, None).await?;
                return Err(e);
            }
            Err(e @ Error::UnsupportedCommand(_)) => {
                send_reply(&mut stream, ReplyCode::CommandNotSupported, None).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        request.remote_addr = peer_addr.map(AddrSpec::from);

        debug!("{} request to {}", request.command, request.dest_addr);

        self.process(stream, request).await
    }

    /// process resolves the destination, applies the rules and dispatches
    async fn process<S>(&self, mut stream: S, mut request: Request) -> Result<()>
    where
        S: Socket + 'static,
    {
        if request.dest_addr.ip.is_none() {
            if let Some(domain) = request.dest_addr.domain.clone() {
                match self.resolver.resolve(&domain).await {
                    Ok(ip) => request.dest_addr.ip = Some(ip),
                    Err(source) => {
                        send_reply(&mut stream, ReplyCode::HostUnreachable, None).await?;
                        return Err(Error::Resolve { domain, source });
                    }
                }
            }
        }

        if !self.rules.allow(&request) {
            send_reply(&mut stream, ReplyCode::ConnectionNotAllowed, None).await?;
            return Err(Error::RuleDenied {
                command: request.command,
                dest: request.dest_addr,
            });
        }

        match request.command {
            Command::Connect => {
                commands::handle_connect(stream, &request, self.dialer.as_ref()).await
            }
            Command::Bind | Command::UdpAssociate => {
                commands::handle_unsupported(&mut stream, &request).await
            }
        }
    }
}
