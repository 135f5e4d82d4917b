//! End-to-end tests over real loopback sockets

use minisocks::auth::StaticCredentials;
use minisocks::{Cipher, CipherKey, NoAuthAuthenticator, Socks5Server, TunnelClient};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Echo server that answers each connection with whatever it received
/// once the peer stops sending
async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut conn, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                conn.read_to_end(&mut buf).await.unwrap();
                conn.write_all(&buf).await.unwrap();
            });
        }
    });

    addr
}

async fn spawn_server(mut server: Socks5Server) -> SocketAddr {
    let addr = server.bind().await.unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

fn connect_request(target: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = target else {
        panic!("test targets are IPv4");
    };
    let mut request = vec![5, 1, 0, 1];
    request.extend_from_slice(&v4.ip().octets());
    request.extend_from_slice(&v4.port().to_be_bytes());
    request
}

/// Reads a success reply with an IPv4 bound address
async fn expect_success(stream: &mut TcpStream) {
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[5, 0, 0, 1]);
}

async fn echo_through(mut stream: TcpStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).await.unwrap();
    echoed
}

#[tokio::test]
async fn test_connect_without_auth() {
    let echo = spawn_echo().await;
    let proxy =
        spawn_server(Socks5Server::new("127.0.0.1:0").with_authenticator(NoAuthAuthenticator))
            .await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [5, 0]);

    stream.write_all(&connect_request(echo)).await.unwrap();
    expect_success(&mut stream).await;

    assert_eq!(echo_through(stream, b"hello proxy").await, b"hello proxy");
}

#[tokio::test]
async fn test_connect_with_credentials() {
    let echo = spawn_echo().await;
    let creds = StaticCredentials::from_iter([("foo", "bar")]);
    let proxy = spawn_server(Socks5Server::new("127.0.0.1:0").with_credentials(Some(creds))).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[5, 1, 2]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [5, 2]);

    stream
        .write_all(&[1, 3, b'f', b'o', b'o', 3, b'b', b'a', b'r'])
        .await
        .unwrap();
    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [1, 0]);

    stream.write_all(&connect_request(echo)).await.unwrap();
    expect_success(&mut stream).await;

    assert_eq!(echo_through(stream, b"authenticated").await, b"authenticated");
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let creds = StaticCredentials::from_iter([("foo", "bar")]);
    let proxy = spawn_server(Socks5Server::new("127.0.0.1:0").with_credentials(Some(creds))).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(&[5, 1, 2, 1, 3, b'f', b'o', b'o', 3, b'b', b'a', b'z'])
        .await
        .unwrap();

    let mut written = Vec::new();
    stream.read_to_end(&mut written).await.unwrap();
    assert_eq!(written, vec![5, 2, 1, 1]);
}

#[tokio::test]
async fn test_no_acceptable_method() {
    let creds = StaticCredentials::from_iter([("foo", "bar")]);
    let proxy = spawn_server(Socks5Server::new("127.0.0.1:0").with_credentials(Some(creds))).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();

    let mut written = Vec::new();
    stream.read_to_end(&mut written).await.unwrap();
    assert_eq!(written, vec![5, 0xFF]);
}

#[tokio::test]
async fn test_connection_refused_reply() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = closed.local_addr().unwrap();
    drop(closed);

    let proxy =
        spawn_server(Socks5Server::new("127.0.0.1:0").with_authenticator(NoAuthAuthenticator))
            .await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    stream.write_all(&connect_request(target)).await.unwrap();

    let mut written = Vec::new();
    stream.read_to_end(&mut written).await.unwrap();
    assert_eq!(written, vec![5, 0, 5, 5, 0, 1, 0, 0, 0, 0, 0, 0]);
}

#[tokio::test]
async fn test_cipher_tunnel_end_to_end() {
    let passphrase = "0123456789abcdef0123456789abcdef";
    let cipher = || Cipher::new(CipherKey::from_passphrase(passphrase, 32).unwrap());

    let echo = spawn_echo().await;
    let proxy = spawn_server(
        Socks5Server::new("127.0.0.1:0")
            .with_authenticator(NoAuthAuthenticator)
            .with_cipher(Some(cipher())),
    )
    .await;

    let mut tunnel = TunnelClient::new("127.0.0.1:0", proxy.to_string(), cipher());
    let local = tunnel.bind().await.unwrap();
    tokio::spawn(async move { tunnel.run().await });

    // The application speaks plain SOCKS5 to the tunnel's local end
    let mut stream = TcpStream::connect(local).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [5, 0]);

    stream.write_all(&connect_request(echo)).await.unwrap();
    expect_success(&mut stream).await;

    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
    assert_eq!(echo_through(stream, &payload).await, payload);
}

#[tokio::test]
async fn test_cipher_server_rejects_plain_client() {
    let key = CipherKey::from_passphrase("0123456789abcdef", 16).unwrap();
    let proxy = spawn_server(
        Socks5Server::new("127.0.0.1:0")
            .with_authenticator(NoAuthAuthenticator)
            .with_cipher(Some(Cipher::new(key))),
    )
    .await;

    // Plain greeting is read as a frame header; the server never answers
    // with a plain method selection
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut written = Vec::new();
    stream.read_to_end(&mut written).await.unwrap();
    assert_ne!(written, vec![5, 0]);
}
