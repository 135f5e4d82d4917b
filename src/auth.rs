use crate::Socket;
use crate::error::{Error, Result};
use crate::protocol::{AuthMethod, AuthStatus, USERPASS_VERSION, Version};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// NegotiationRequest is the client's method-selection message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    pub version: u8,
    pub methods: Vec<u8>,
}

impl NegotiationRequest {
    /// read_from parses the method-selection message from the client
    pub async fn read_from<R>(stream: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        // ClientHello format
        // +----+----------+----------+
        // |VER | NMETHODS | METHODS  |
        // +----+----------+----------+
        // | 1  |    1     | 1 to 255 |
        // +----+----------+----------+

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await?;

        let mut methods = vec![0u8; buf[1] as usize];
        stream.read_exact(&mut methods).await?;

        Ok(Self {
            version: buf[0],
            methods,
        })
    }
}

/// AuthContext records which method authenticated the client and
/// what that method learned about it, e.g. `{"user": name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub method: u8,
    pub payload: HashMap<String, String>,
}

/// Authenticator performs one authentication method's wire exchange,
/// starting with the method-selection reply
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// code is the METHOD byte this authenticator answers to
    fn code(&self) -> u8;

    /// authenticate runs the exchange and yields the resulting context
    async fn authenticate(&self, stream: &mut dyn Socket) -> Result<AuthContext>;
}

/// NoAuthAuthenticator accepts every client without further exchange
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthAuthenticator;

#[async_trait]
impl Authenticator for NoAuthAuthenticator {
    fn code(&self) -> u8 {
        AuthMethod::NoAuth as u8
    }

    async fn authenticate(&self, stream: &mut dyn Socket) -> Result<AuthContext> {
        stream
            .write_all(&[Version::SOCKS5 as u8, AuthMethod::NoAuth as u8])
            .await?;

        Ok(AuthContext {
            method: AuthMethod::NoAuth as u8,
            payload: HashMap::new(),
        })
    }
}

/// CredentialStore answers whether a username/password pair is valid
pub trait CredentialStore: Send + Sync {
    fn valid(&self, username: &str, password: &str) -> bool;
}

/// StaticCredentials is an in-memory username -> password map
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert adds or replaces a user
    pub fn insert(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl<U, P> FromIterator<(U, P)> for StaticCredentials
where
    U: Into<String>,
    P: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (U, P)>>(iter: I) -> Self {
        let mut creds = Self::new();
        for (username, password) in iter {
            creds.insert(username, password);
        }
        creds
    }
}

impl From<HashMap<String, String>> for StaticCredentials {
    fn from(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

impl CredentialStore for StaticCredentials {
    fn valid(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}

/// UserPassAuthenticator implements RFC 1929 against a credential store
#[derive(Clone)]
pub struct UserPassAuthenticator {
    credentials: Arc<dyn CredentialStore>,
}

impl UserPassAuthenticator {
    pub fn new(credentials: impl CredentialStore + 'static) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }
}

#[async_trait]
impl Authenticator for UserPassAuthenticator {
    fn code(&self) -> u8 {
        AuthMethod::UserPass as u8
    }

    async fn authenticate(&self, stream: &mut dyn Socket) -> Result<AuthContext> {
        stream
            .write_all(&[Version::SOCKS5 as u8, AuthMethod::UserPass as u8])
            .await?;

        // Client Username/Password Request
        // +----+------+----------+------+----------+
        // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
        // +----+------+----------+------+----------+
        // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
        // +----+------+----------+------+----------+

        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await?;

        let mut username = vec![0u8; header[1] as usize];
        stream.read_exact(&mut username).await?;

        let mut password_len = [0u8; 1];
        stream.read_exact(&mut password_len).await?;

        let mut password = vec![0u8; password_len[0] as usize];
        stream.read_exact(&mut password).await?;

        if header[0] != USERPASS_VERSION {
            return Err(Error::UnsupportedAuthVersion(header[0]));
        }

        let username = String::from_utf8_lossy(&username).into_owned();
        let password = String::from_utf8_lossy(&password);

        let status = if self.credentials.valid(&username, &password) {
            AuthStatus::Success
        } else {
            AuthStatus::Failure
        };

        // Username/Password Server response
        // +----+--------+
        // |VER | STATUS |
        // +----+--------+
        // | 1  |   1    |
        // +----+--------+

        // The status goes out before any failure is reported
        stream.write_all(&[USERPASS_VERSION, status as u8]).await?;

        match status {
            AuthStatus::Success => Ok(AuthContext {
                method: AuthMethod::UserPass as u8,
                payload: HashMap::from([("user".to_string(), username)]),
            }),
            AuthStatus::Failure => {
                debug!("rejected credentials for user {username:?}");
                Err(Error::AuthenticationFailed)
            }
        }
    }
}

/// negotiate_auth reads the client's offered methods and runs the first
/// one, in client order, that has a configured authenticator
pub async fn negotiate_auth(
    stream: &mut dyn Socket,
    authenticators: &[Arc<dyn Authenticator>],
) -> Result<AuthContext> {
    let request = NegotiationRequest::read_from(stream).await?;

    // Ensure version is 0x05 -> SOCKS5
    if request.version != Version::SOCKS5 as u8 {
        return Err(Error::UnsupportedVersion(request.version));
    }

    let selected = request.methods.iter().find_map(|&method| {
        authenticators
            .iter()
            .find(|authenticator| authenticator.code() == method)
    });

    match selected {
        Some(authenticator) => {
            let context = authenticator.authenticate(stream).await?;
            info!("authentication succeeded with method {}", context.method);
            Ok(context)
        }
        None => {
            // ServerChoice method selection reply format
            // +----+--------+
            // |VER | METHOD |
            // +----+--------+
            // | 1  |   1    |
            // +----+--------+
            stream
                .write_all(&[Version::SOCKS5 as u8, AuthMethod::NoAcceptable as u8])
                .await?;
            Err(Error::NoSupportedAuth)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn foo_bar() -> Arc<dyn Authenticator> {
        Arc::new(UserPassAuthenticator::new(StaticCredentials::from_iter([(
            "foo", "bar",
        )])))
    }

    /// run feeds `input` to negotiate_auth and returns its result together
    /// with every byte the server wrote back
    async fn run(
        input: &[u8],
        authenticators: &[Arc<dyn Authenticator>],
    ) -> (Result<AuthContext>, Vec<u8>) {
        let (mut client, mut server) = duplex(1024);
        client.write_all(input).await.unwrap();

        let result = negotiate_auth(&mut server, authenticators).await;
        drop(server);

        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        (result, written)
    }

    #[tokio::test]
    async fn no_auth_selected() {
        let auths: Vec<Arc<dyn Authenticator>> = vec![Arc::new(NoAuthAuthenticator)];
        let (result, written) = run(&[5, 1, 0], &auths).await;

        let ctx = result.unwrap();
        assert_eq!(ctx.method, 0);
        assert!(ctx.payload.is_empty());
        assert_eq!(written, vec![5, 0]);
    }

    #[tokio::test]
    async fn userpass_success() {
        let input = [5, 1, 2, 1, 3, b'f', b'o', b'o', 3, b'b', b'a', b'r'];
        let (result, written) = run(&input, &[foo_bar()]).await;

        let ctx = result.unwrap();
        assert_eq!(ctx.method, 2);
        assert_eq!(ctx.payload.get("user").map(String::as_str), Some("foo"));
        assert_eq!(written, vec![5, 2, 1, 0]);
    }

    #[tokio::test]
    async fn userpass_wrong_password() {
        let input = [5, 1, 2, 1, 3, b'f', b'o', b'o', 3, b'b', b'a', b'z'];
        let (result, written) = run(&input, &[foo_bar()]).await;

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
        assert_eq!(written, vec![5, 2, 1, 1]);
    }

    #[tokio::test]
    async fn userpass_bad_subnegotiation_version() {
        let input = [5, 1, 2, 5, 3, b'f', b'o', b'o', 3, b'b', b'a', b'r'];
        let (result, written) = run(&input, &[foo_bar()]).await;

        assert!(matches!(result, Err(Error::UnsupportedAuthVersion(5))));
        assert_eq!(written, vec![5, 2]);
    }

    #[tokio::test]
    async fn no_acceptable_method() {
        let (result, written) = run(&[5, 1, 0], &[foo_bar()]).await;

        assert!(matches!(result, Err(Error::NoSupportedAuth)));
        assert_eq!(written, vec![5, 255]);
    }

    #[tokio::test]
    async fn client_order_wins_over_registration_order() {
        let auths: Vec<Arc<dyn Authenticator>> = vec![Arc::new(NoAuthAuthenticator), foo_bar()];
        let input = [5, 2, 2, 0, 1, 3, b'f', b'o', b'o', 3, b'b', b'a', b'r'];
        let (result, written) = run(&input, &auths).await;

        assert_eq!(result.unwrap().method, 2);
        assert_eq!(written, vec![5, 2, 1, 0]);

        let (result, written) = run(&[5, 2, 0, 2], &auths).await;
        assert_eq!(result.unwrap().method, 0);
        assert_eq!(written, vec![5, 0]);
    }

    #[tokio::test]
    async fn wrong_socks_version() {
        let auths: Vec<Arc<dyn Authenticator>> = vec![Arc::new(NoAuthAuthenticator)];
        let (result, written) = run(&[4, 1, 0], &auths).await;

        assert!(matches!(result, Err(Error::UnsupportedVersion(4))));
        assert!(written.is_empty());
    }

    #[test]
    fn static_credentials() {
        let creds = StaticCredentials::from_iter([("foo", "bar"), ("baz", "")]);

        assert!(creds.valid("foo", "bar"));
        assert!(creds.valid("baz", ""));
        assert!(!creds.valid("foo", ""));
        assert!(!creds.valid("nobody", "bar"));
    }
}
