use crate::cipher::{Cipher, CipherTransport};
use crate::error::{Error, Result};
use crate::relay;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TunnelClient accepts local plain connections (e.g. from a browser) and
/// forwards each one, encrypted, to a remote server running in cipher mode.
///
/// ```text
/// app --plain--> TunnelClient ==cipher==> Socks5Server --plain--> target
/// ```
pub struct TunnelClient {
    pub listen_addr: String,
    pub remote_addr: String,
    cipher: Arc<Cipher>,
    listener: Option<TcpListener>,
}

/// TunnelClient implementation block
impl TunnelClient {
    /// new is a constructor for the TunnelClient type
    pub fn new(listen_addr: impl Into<String>, remote_addr: impl Into<String>, cipher: Cipher) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            remote_addr: remote_addr.into(),
            cipher: Arc::new(cipher),
            listener: None,
        }
    }

    /// bind to the local listen address; may only be called once
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            return Err(Error::config("bind can only be called once"));
        }

        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;

        info!("tunnel listening on {:?}, forwarding to {}", addr, self.remote_addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run accepts local connections until the listener fails to bind
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::config("listener already consumed"))?;

        loop {
            let (local, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let remote_addr = self.remote_addr.clone();
            let cipher = Arc::clone(&self.cipher);

            tokio::spawn(async move {
                info!("new client: {}", peer_addr);

                if let Err(e) = forward(local, &remote_addr, cipher).await {
                    error!("connection error: {}", e);
                }
            });
        }
    }
}

/// forward bridges one local connection to the remote server, encrypting
/// what the local side sends and decrypting what comes back
async fn forward(local: TcpStream, remote_addr: &str, cipher: Arc<Cipher>) -> Result<()> {
    let remote = TcpStream::connect(remote_addr).await?;
    debug!("tunnel connected to {}", remote_addr);

    let (mut local_read, mut local_write) = local.into_split();
    let (remote_read, remote_write) = remote.into_split();

    let mut encoder = CipherTransport::new(remote_write, Arc::clone(&cipher));
    let mut decoder = CipherTransport::new(remote_read, cipher);

    let outbound = async move {
        let copied = encoder.encode_copy(&mut local_read).await;
        if let Err(e) = encoder.shutdown().await {
            debug!("half-close failed: {e}");
        }
        copied
    };
    let inbound = async move {
        let copied = decoder.decode_copy(&mut local_write).await;
        if let Err(e) = local_write.shutdown().await {
            debug!("half-close failed: {e}");
        }
        copied
    };

    let (sent, received) = relay::pump_pair(outbound, inbound).await?;
    info!(
        "tunnel closed: {} bytes sent, {} bytes received",
        sent, received
    );

    Ok(())
}
