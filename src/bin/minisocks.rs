use anyhow::{Context, Result, bail};
use clap::Parser;
use minisocks::config::FileConfig;
use minisocks::{NoAuthAuthenticator, Socks5Server, TunnelClient};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy with an optional encrypted tunnel", long_about = None)]
struct Args {
    /// Listener address [default: 127.0.0.1:1080]
    #[arg(short, long)]
    listen: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Cipher passphrase; enables the encrypted tunnel
    #[arg(short, long)]
    key: Option<String>,

    /// Cipher key size in bytes (16, 24 or 32)
    #[arg(long)]
    key_size: Option<usize>,

    /// Run as tunnel client instead of SOCKS5 server
    #[arg(long)]
    client: bool,

    /// Cipher-mode server to forward to (tunnel client only)
    #[arg(short, long)]
    remote: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match &args.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FileConfig::default(),
    };

    // Command line wins over the file
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(remote) = args.remote {
        config.remote = Some(remote);
    }
    if let Some(key) = args.key {
        config.key = Some(key);
    }
    if let Some(key_size) = args.key_size {
        config.key_size = key_size;
    }

    let cipher = config.cipher()?;

    if args.client {
        let Some(remote) = config.remote.clone() else {
            bail!("[ERR] tunnel client needs --remote");
        };
        let Some(cipher) = cipher else {
            bail!("[ERR] tunnel client needs --key");
        };

        let mut tunnel = TunnelClient::new(config.listen.clone(), remote, cipher);
        info!("Starting tunnel client: {}", tunnel.listen_addr);
        tunnel.run().await?;
        return Ok(());
    }

    // Check for auth and grab it if present
    let credentials = match (args.username, args.password) {
        (Some(u), Some(p)) => {
            let mut credentials = config.credentials().unwrap_or_default();
            credentials.insert(u, p);
            Some(credentials)
        }
        (None, None) => config.credentials(),
        _ => bail!("[ERR] must provide both username and password (or neither)"),
    };

    // Instantiate server
    let mut server = Socks5Server::new(config.listen.clone())
        .with_rules(config.rules())
        .with_cipher(cipher);

    server = match credentials {
        Some(credentials) => {
            info!("Authentication enabled");
            server.with_credentials(Some(credentials))
        }
        None => server.with_authenticator(NoAuthAuthenticator),
    };

    // Run it
    info!("Starting SOCKS5 proxy: {}", server.listen_addr);
    server.run().await?;
    Ok(())
}
