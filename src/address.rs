use crate::error::{Error, Result};
use crate::protocol::AddressType;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// AddrSpec is a SOCKS5 destination or bound address: a domain name
/// and/or an IP, its wire address type and a port.
///
/// A parsed domain address carries only `domain`; once resolved, `ip` is
/// filled in place and everything downstream dials the IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrSpec {
    pub domain: Option<String>,
    pub ip: Option<IpAddr>,
    pub addr_type: AddressType,
    pub port: u16,
}

/// AddrSpec implementation block
impl AddrSpec {
    /// from_domain builds an unresolved domain address
    pub fn from_domain(domain: impl Into<String>, port: u16) -> Self {
        Self {
            domain: Some(domain.into()),
            ip: None,
            addr_type: AddressType::DomainName,
            port,
        }
    }

    /// unspecified is the all-zero IPv4 address used in failure replies
    pub fn unspecified() -> Self {
        Self::from(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }

    /// socket_addr returns the dialable address, if an IP is known
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }

    /// address renders `ip:port` when resolved, `domain:port` otherwise
    pub fn address(&self) -> String {
        match (self.socket_addr(), &self.domain) {
            (Some(addr), _) => addr.to_string(),
            (None, Some(domain)) => format!("{domain}:{}", self.port),
            (None, None) => format!("0.0.0.0:{}", self.port),
        }
    }

    /// read_from parses `ATYP | ADDR | PORT` from a stream
    pub async fn read_from<R>(stream: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        // Read address type byte from stream
        let mut atype = [0u8; 1];
        stream.read_exact(&mut atype).await?;

        let addr_type =
            AddressType::from_byte(atype[0]).ok_or(Error::UnrecognizedAddressType(atype[0]))?;

        // Match type and extract address or domain name
        let mut spec = match addr_type {
            AddressType::IPv4 => {
                let mut addr = [0u8; 4];
                stream.read_exact(&mut addr).await?;
                Self::from(SocketAddr::from((Ipv4Addr::from(addr), 0)))
            }
            AddressType::DomainName => {
                // First octet in DomainName contains the number of
                // octets to follow
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;

                let mut domain = vec![0u8; len[0] as usize];
                stream.read_exact(&mut domain).await?;
                // Invalid UTF-8 is left for the resolver to reject
                let domain = String::from_utf8_lossy(&domain).into_owned();

                Self::from_domain(domain, 0)
            }
            AddressType::IPv6 => {
                let mut addr = [0u8; 16];
                stream.read_exact(&mut addr).await?;
                Self::from(SocketAddr::from((Ipv6Addr::from(addr), 0)))
            }
        };

        // Read port -> BigEndian (network order)
        let mut port_buf = [0u8; 2];
        stream.read_exact(&mut port_buf).await?;
        spec.port = u16::from_be_bytes(port_buf);

        Ok(spec)
    }

    /// encode appends `ATYP | ADDR | PORT` to buf
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match (self.addr_type, &self.domain, self.ip) {
            (AddressType::DomainName, Some(domain), _) => {
                let len = u8::try_from(domain.len()).map_err(|_| {
                    Error::InvalidAddress(format!("domain name too long: {}", domain.len()))
                })?;
                buf.push(AddressType::DomainName as u8);
                buf.push(len);
                buf.extend_from_slice(domain.as_bytes());
            }
            (_, _, Some(IpAddr::V4(ip))) => {
                buf.push(AddressType::IPv4 as u8);
                buf.extend_from_slice(&ip.octets());
            }
            (_, _, Some(IpAddr::V6(ip))) => {
                buf.push(AddressType::IPv6 as u8);
                buf.extend_from_slice(&ip.octets());
            }
            _ => {
                return Err(Error::InvalidAddress(format!(
                    "failed to format address: {self}"
                )));
            }
        }

        buf.extend_from_slice(&self.port.to_be_bytes());
        Ok(())
    }
}

impl From<SocketAddr> for AddrSpec {
    fn from(addr: SocketAddr) -> Self {
        let addr_type = match addr {
            SocketAddr::V4(_) => AddressType::IPv4,
            SocketAddr::V6(_) => AddressType::IPv6,
        };
        Self {
            domain: None,
            ip: Some(addr.ip()),
            addr_type,
            port: addr.port(),
        }
    }
}

impl fmt::Display for AddrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.domain, self.ip) {
            (Some(domain), Some(ip)) => write!(f, "{domain} ({ip}):{}", self.port),
            (Some(domain), None) => write!(f, "{domain}:{}", self.port),
            (None, _) => f.write_str(&self.address()),
        }
    }
}
