use crate::auth::{Authenticator, StaticCredentials, UserPassAuthenticator};
use crate::cipher::{self, Cipher};
use crate::commands::Dialer;
use crate::engine::ProtocolEngine;
use crate::error::{Error, Result};
use crate::resolver::NameResolver;
use crate::rules::RuleSet;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    engine: ProtocolEngine,
    cipher: Option<Arc<Cipher>>,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            engine: ProtocolEngine::new(),
            cipher: None,
            listener: None,
        }
    }

    /// with_credentials enables username/password authentication
    pub fn with_credentials(self, credentials: Option<StaticCredentials>) -> Self {
        match credentials {
            Some(credentials) => self.with_authenticator(UserPassAuthenticator::new(credentials)),
            None => self,
        }
    }

    /// with_authenticator adds an authentication method
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.engine = self.engine.with_authenticator(authenticator);
        self
    }

    pub fn with_resolver(mut self, resolver: impl NameResolver + 'static) -> Self {
        self.engine = self.engine.with_resolver(resolver);
        self
    }

    pub fn with_rules(mut self, rules: impl RuleSet + 'static) -> Self {
        self.engine = self.engine.with_rules(rules);
        self
    }

    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.engine = self.engine.with_dialer(dialer);
        self
    }

    /// with_cipher makes the server expect encrypted client connections
    pub fn with_cipher(mut self, cipher: Option<Cipher>) -> Self {
        self.cipher = cipher.map(Arc::new);
        self
    }

    /// bind to the listen address; may only be called once
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            return Err(Error::config("bind can only be called once"));
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {:?}", addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run handles server spinup and listens for incoming connections.
    /// Only a failure to bind ends it; per-connection errors are logged
    pub async fn run(&mut self) -> Result<()> {
        if self.engine.authenticators().is_empty() {
            return Err(Error::config(
                "at least one authentication method must be enabled",
            ));
        }

        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::config("listener already consumed"))?;

        let engine = Arc::new(self.engine.clone());

        // Listen for connections to proxy
        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            // Clone for this connection
            let engine = Arc::clone(&engine);
            let cipher = self.cipher.clone();

            // Spawn async task
            tokio::spawn(async move {
                info!("new client: {}", peer_addr);

                let result = match cipher {
                    Some(cipher) => {
                        let plain = cipher::spawn_plain_stream(inbound, cipher);
                        engine.handle(plain, Some(peer_addr)).await
                    }
                    None => engine.handle(inbound, Some(peer_addr)).await,
                };

                if let Err(e) = result {
                    error!("connection error: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoAuthAuthenticator;

    #[tokio::test]
    async fn refuses_to_run_without_authenticators() {
        let mut server = Socks5Server::new("127.0.0.1:0");
        assert!(matches!(server.run().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn bind_twice_is_an_error() {
        let mut server = Socks5Server::new("127.0.0.1:0").with_authenticator(NoAuthAuthenticator);
        let addr = server.bind().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(matches!(server.bind().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn bind_failure_is_surfaced() {
        let mut first = Socks5Server::new("127.0.0.1:0").with_authenticator(NoAuthAuthenticator);
        let addr = first.bind().await.unwrap();

        let mut second = Socks5Server::new(addr.to_string()).with_authenticator(NoAuthAuthenticator);
        assert!(matches!(second.run().await, Err(Error::Io(_))));
    }
}
