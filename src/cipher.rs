//! Symmetric-cipher envelope for tunnelling a byte stream.
//!
//! Every message is AES-CBC encrypted with PKCS#7 padding under a fresh
//! random IV and framed on the wire as:
//!
//! ```text
//! +--------+--------+-------------------+
//! |  LEN   |   IV   |    CIPHERTEXT     |
//! +--------+--------+-------------------+
//! |   2    |   16   | LEN - 16 (n * 16) |
//! +--------+--------+-------------------+
//! ```
//!
//! Frames let the reader reassemble messages that TCP splits or merges,
//! so padding is always validated and stripped on a whole message.

use crate::commands::{Connection, Dialer};
use crate::error::{Error, Result};
use crate::relay;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use aes::{Aes128, Aes192, Aes256};
use async_trait::async_trait;
use rand::RngCore;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tracing::debug;

/// AES block size, also the IV length
pub const BLOCK_SIZE: usize = 16;

/// Supported key lengths: AES-128, AES-192, AES-256
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Largest plaintext carried by one frame; keeps LEN within 16 bits
pub const MAX_FRAME_PLAINTEXT: usize = 16 * 1024;

/// Copy buffer size for encode_copy / decode_copy
const BUF_SIZE: usize = 4096;

/// Capacity of the in-memory pipe behind spawn_plain_stream
const PIPE_CAPACITY: usize = 64 * 1024;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// CipherKey is the fixed-length key sliced from the operator passphrase
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey {
    bytes: Vec<u8>,
}

impl CipherKey {
    /// new validates that `bytes` is an AES key length
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if !KEY_SIZES.contains(&bytes.len()) {
            return Err(Error::cipher(format!(
                "unsupported key length {} (expected 16, 24 or 32)",
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// from_passphrase takes the first `size` bytes of the passphrase
    pub fn from_passphrase(passphrase: &str, size: usize) -> Result<Self> {
        let bytes = passphrase.as_bytes();
        if bytes.len() < size {
            return Err(Error::cipher(format!(
                "passphrase must be at least {size} bytes, got {}",
                bytes.len()
            )));
        }
        Self::new(&bytes[..size])
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Cipher encrypts and decrypts whole messages with AES-CBC
#[derive(Debug, Clone)]
pub struct Cipher {
    key: CipherKey,
}

fn invalid_length(e: impl fmt::Display) -> Error {
    Error::cipher(format!("cannot initialise cipher: {e}"))
}

impl Cipher {
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }

    /// encrypt pads the plaintext and returns `IV || ciphertext`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let key = &self.key.bytes;
        let ciphertext = match key.len() {
            16 => Aes128CbcEnc::new_from_slices(key, &iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => Aes192CbcEnc::new_from_slices(key, &iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            32 => Aes256CbcEnc::new_from_slices(key, &iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            n => return Err(Error::cipher(format!("unsupported key length {n}"))),
        };

        let mut message = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
        message.extend_from_slice(&iv);
        message.extend_from_slice(&ciphertext);
        Ok(message)
    }

    /// decrypt takes `IV || ciphertext` and returns the unpadded plaintext
    pub fn decrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        // IV plus at least one block, whole blocks only
        if message.len() < 2 * BLOCK_SIZE || message.len() % BLOCK_SIZE != 0 {
            return Err(Error::cipher(format!(
                "invalid message length {}",
                message.len()
            )));
        }
        let (iv, ciphertext) = message.split_at(BLOCK_SIZE);

        let key = &self.key.bytes;
        let plaintext = match key.len() {
            16 => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            24 => Aes192CbcDec::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            32 => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            n => return Err(Error::cipher(format!("unsupported key length {n}"))),
        };

        plaintext.map_err(|_| Error::cipher("invalid padding"))
    }
}

/// CipherTransport wraps a byte stream (or one half of one) so that
/// writes go out encrypted and reads come back decrypted
pub struct CipherTransport<S> {
    inner: S,
    cipher: Arc<Cipher>,
    // Decrypted bytes of the current frame not yet handed to a reader
    pending: Vec<u8>,
    offset: usize,
}

impl<S> CipherTransport<S> {
    pub fn new(inner: S, cipher: Arc<Cipher>) -> Self {
        Self {
            inner,
            cipher,
            pending: Vec::new(),
            offset: 0,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncWrite + Unpin> CipherTransport<S> {
    /// encode_write encrypts buf and writes every resulting frame,
    /// returning the number of plaintext bytes consumed. A sink that stops
    /// accepting bytes part way through fails with ShortWrite
    pub async fn encode_write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut wire = Vec::with_capacity(buf.len() + 2 * (2 + 2 * BLOCK_SIZE));

        for chunk in buf.chunks(MAX_FRAME_PLAINTEXT) {
            let message = self.cipher.encrypt(chunk)?;
            let len = u16::try_from(message.len())
                .map_err(|_| Error::cipher(format!("frame too large: {}", message.len())))?;

            wire.extend_from_slice(&len.to_be_bytes());
            wire.extend_from_slice(&message);
        }

        let mut written = 0;
        while written < wire.len() {
            match self.inner.write(&wire[written..]).await? {
                0 => {
                    return Err(Error::ShortWrite {
                        expected: wire.len(),
                        written,
                    });
                }
                n => written += n,
            }
        }
        self.inner.flush().await?;

        Ok(buf.len())
    }

    /// encode_copy reads plaintext from src and writes it encrypted until
    /// src reaches EOF
    pub async fn encode_copy<R>(&mut self, src: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; BUF_SIZE];
        let mut total = 0u64;

        loop {
            let read = src.read(&mut buf).await?;
            if read == 0 {
                return Ok(total);
            }

            total += self.encode_write(&buf[..read]).await? as u64;
        }
    }

    /// shutdown closes the underlying stream for writing
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

impl<S: AsyncRead + Unpin> CipherTransport<S> {
    /// decode_read fills buf with decrypted plaintext. Returns 0 only on a
    /// clean EOF between frames
    pub async fn decode_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Frames may decrypt to nothing; keep reading until data or EOF
        while self.offset >= self.pending.len() {
            match self.read_frame().await? {
                Some(plaintext) => {
                    self.pending = plaintext;
                    self.offset = 0;
                }
                None => return Ok(0),
            }
        }

        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;

        Ok(n)
    }

    /// decode_copy reads encrypted frames and writes the plaintext to dst
    /// until the encrypted side reaches EOF
    pub async fn decode_copy<W>(&mut self, dst: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; BUF_SIZE];
        let mut total = 0u64;

        loop {
            let read = self.decode_read(&mut buf).await?;
            if read == 0 {
                return Ok(total);
            }

            dst.write_all(&buf[..read]).await?;
            total += read as u64;
        }
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 2];

        // EOF before the first length byte is a clean close
        if self.inner.read(&mut len_buf[..1]).await? == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut len_buf[1..]).await?;

        let mut message = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        self.inner.read_exact(&mut message).await?;

        self.cipher.decrypt(&message).map(Some)
    }
}

/// spawn_plain_stream decrypts an encrypted stream into an in-memory pipe
/// and returns the plain end. Bytes written to the plain end go out
/// encrypted. The pumps run until both directions reach EOF
pub fn spawn_plain_stream<S>(stream: S, cipher: Arc<Cipher>) -> DuplexStream
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (plain, pipe) = tokio::io::duplex(PIPE_CAPACITY);
    let (raw_read, raw_write) = tokio::io::split(stream);
    let (mut pipe_read, mut pipe_write) = tokio::io::split(pipe);

    let mut decoder = CipherTransport::new(raw_read, Arc::clone(&cipher));
    let mut encoder = CipherTransport::new(raw_write, cipher);

    let inbound = async move {
        let copied = decoder.decode_copy(&mut pipe_write).await;
        let _ = pipe_write.shutdown().await;
        copied
    };
    let outbound = async move {
        let copied = encoder.encode_copy(&mut pipe_read).await;
        let _ = encoder.shutdown().await;
        copied
    };

    tokio::spawn(async move {
        match relay::pump_pair(inbound, outbound).await {
            Ok((decrypted, encrypted)) => {
                debug!("cipher stream closed: {decrypted} bytes in, {encrypted} bytes out")
            }
            Err(e) => debug!("cipher stream failed: {e}"),
        }
    });

    plain
}

/// CipherDialer reaches the destination through a CipherTransport, for
/// chaining into another server that runs in cipher mode
#[derive(Debug, Clone)]
pub struct CipherDialer {
    cipher: Arc<Cipher>,
}

impl CipherDialer {
    pub fn new(cipher: Arc<Cipher>) -> Self {
        Self { cipher }
    }
}

#[async_trait]
impl Dialer for CipherDialer {
    async fn dial(&self, target: SocketAddr) -> io::Result<Connection> {
        let stream = TcpStream::connect(target).await?;
        let local_addr = stream.local_addr()?;

        Ok(Connection {
            stream: Box::new(spawn_plain_stream(stream, Arc::clone(&self.cipher))),
            local_addr,
        })
    }
}
