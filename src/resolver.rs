use async_trait::async_trait;
use std::io;
use std::net::IpAddr;

/// NameResolver turns a destination domain into an IP address
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> io::Result<IpAddr>;
}

/// DnsResolver uses the system resolver to resolve host names
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, name: &str) -> io::Result<IpAddr> {
        tokio::net::lookup_host((name, 0))
            .await?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IP address found for '{name}'"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_ip_literals() {
        let ip = DnsResolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));

        let ip = DnsResolver.resolve("::1").await.unwrap();
        assert!(ip.is_loopback());
    }
}
