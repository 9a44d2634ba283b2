#![allow(dead_code)]

mod crypto;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use rscp_codec::{
    frame_length, pack_frame, unpack_frame, CodecError, RscpValue, Tag, Value, FRAME_MAGIC,
};

pub use crypto::{RscpCipher, BLOCK_SIZE};

/// Connection settings for an E3/DC storage speaking RSCP.
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Portal user name.
    pub username: String,
    pub password: String,
    /// Pre-shared RSCP key set on the device display.
    pub rscp_key: String,
    pub connect_timeout_ms: u64,
    /// Per-receive timeout in milliseconds; on expiry the connection is torn down.
    pub receive_timeout_ms: u64,
    /// Upper bound for one encrypted response.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5033,
            username: String::new(),
            password: String::new(),
            rscp_key: String::new(),
            connect_timeout_ms: 3_000,
            receive_timeout_ms: 5_000,
            max_frame_size: 64 * 1024,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("rscp_key", &"<redacted>")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("receive_timeout_ms", &self.receive_timeout_ms)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid socket address {0}:{1}")]
    InvalidAddress(String, u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connect to {host}:{port} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout_ms: u64,
    },
    #[error("receive timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("connection closed by peer")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("not authorized")]
    NotAuthorized,
    #[error("authorization rejected for user {username}, check username, password and RSCP key")]
    AuthorizationRejected { username: String },
    #[error("response exceeds {max} bytes")]
    FrameTooLarge { max: usize },
    #[error("frame codec error: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Authorized,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Authorized => write!(f, "AUTHORIZED"),
        }
    }
}

/// Byte-stream link to the device carrying encrypted RSCP frames.
///
/// `send` takes a plain frame and `receive` yields a plain (decrypted) buffer;
/// encryption is the transport's business. `receive` returns `Ok(None)` when the
/// received bytes could not be decrypted.
#[async_trait]
pub trait Transport: Send {
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    fn is_authorized(&self) -> bool {
        self.state() == ConnectionState::Authorized
    }

    async fn connect(&mut self) -> Result<(), ConnectionError>;

    async fn authorize(&mut self) -> Result<(), ConnectionError>;

    async fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError>;

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, ConnectionError>;

    async fn disconnect(&mut self);
}

#[derive(Debug)]
pub struct RscpConnection {
    config: ConnectionConfig,
    stream: Option<TcpStream>,
    cipher: RscpCipher,
    state: ConnectionState,
}

impl RscpConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        let cipher = RscpCipher::new(&config.rscp_key);
        Self {
            config,
            stream: None,
            cipher,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn teardown(&mut self) {
        if self.stream.take().is_some() {
            debug!(host = %self.config.host, "connection torn down");
        }
        self.cipher.reset();
        self.state = ConnectionState::Disconnected;
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let encrypted = self.cipher.encrypt(frame);
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        if let Err(err) = stream.write_all(&encrypted).await {
            warn!(host = %self.config.host, error = %err, "rscp write failed");
            self.teardown();
            return Err(ConnectionError::Io(err));
        }
        debug!(plain_len = frame.len(), encrypted_len = encrypted.len(), "rscp frame sent");
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        let max_frame_size = self.config.max_frame_size;
        let encrypted = self.read_encrypted(max_frame_size).await?;

        let Some(mut plain) = self.cipher.decrypt(&encrypted) else {
            warn!(encrypted_len = encrypted.len(), "rscp decryption failed");
            return Ok(None);
        };

        if plain.len() < 2 || u16::from_le_bytes([plain[0], plain[1]]) != FRAME_MAGIC {
            warn!("decrypted data is not an RSCP frame, is the RSCP key correct?");
            return Ok(None);
        }

        let mut received = encrypted.len();
        while let Some(expected) = frame_length(&plain) {
            if plain.len() >= expected {
                break;
            }
            if expected > max_frame_size {
                let err = ConnectionError::FrameTooLarge {
                    max: max_frame_size,
                };
                warn!(host = %self.config.host, expected, error = %err, "rscp receive failed");
                self.teardown();
                return Err(err);
            }

            debug!(received = plain.len(), expected, "rscp frame incomplete, reading on");
            let more = self
                .read_encrypted(max_frame_size.saturating_sub(received))
                .await?;
            received += more.len();
            let Some(tail) = self.cipher.decrypt(&more) else {
                warn!(encrypted_len = more.len(), "rscp decryption failed mid-frame");
                self.teardown();
                return Ok(None);
            };
            plain.extend_from_slice(&tail);
        }

        debug!(encrypted_len = received, "rscp frame received");
        Ok(Some(plain))
    }

    /// Reads the next run of cipher blocks. Any failure tears the connection down.
    async fn read_encrypted(&mut self, max_len: usize) -> Result<Vec<u8>, ConnectionError> {
        let received = match self.stream.as_mut() {
            Some(stream) => read_blocks(stream, self.config.receive_timeout_ms, max_len).await,
            None => Err(ConnectionError::NotConnected),
        };

        match received {
            Ok(encrypted) => Ok(encrypted),
            Err(err) => {
                let err = match err {
                    ConnectionError::FrameTooLarge { .. } => ConnectionError::FrameTooLarge {
                        max: self.config.max_frame_size,
                    },
                    other => other,
                };
                warn!(host = %self.config.host, error = %err, "rscp receive failed");
                self.teardown();
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Transport for RscpConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }
        if self.config.host.trim().is_empty() || self.config.port == 0 {
            return Err(ConnectionError::InvalidAddress(
                self.config.host.clone(),
                self.config.port,
            ));
        }

        let target = (self.config.host.as_str(), self.config.port);
        let stream = match timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(target),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                warn!(host = %self.config.host, port = self.config.port, error = %err, "rscp connect failed");
                return Err(ConnectionError::Io(err));
            }
            Err(_) => {
                warn!(host = %self.config.host, port = self.config.port, "rscp connect timeout");
                return Err(ConnectionError::ConnectTimeout {
                    host: self.config.host.clone(),
                    port: self.config.port,
                    timeout_ms: self.config.connect_timeout_ms,
                });
            }
        };
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.cipher.reset();
        self.state = ConnectionState::Connected;
        info!(host = %self.config.host, port = self.config.port, "rscp connected");
        Ok(())
    }

    async fn authorize(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Disconnected => return Err(ConnectionError::NotConnected),
            ConnectionState::Authorized => return Ok(()),
            ConnectionState::Connected => {}
        }

        let request = RscpValue::container(
            Tag::RSCP_REQ_AUTHENTICATION,
            vec![
                RscpValue::new(
                    Tag::RSCP_AUTHENTICATION_USER,
                    Value::CString(self.config.username.clone()),
                ),
                RscpValue::new(
                    Tag::RSCP_AUTHENTICATION_PASSWORD,
                    Value::CString(self.config.password.clone()),
                ),
            ],
        );
        let frame = pack_frame(&[request])?;
        self.write_frame(&frame).await?;

        let username = self.config.username.clone();
        let rejected = || ConnectionError::AuthorizationRejected {
            username: username.clone(),
        };

        let Some(plain) = self.read_frame().await? else {
            return Err(rejected());
        };
        let response = unpack_frame(&plain)?;
        let level = RscpValue::find_by_path(&response.values, &[Tag::RSCP_AUTHENTICATION])
            .and_then(|value| value.value.as_i64());

        match level {
            Some(level) if level > 0 => {
                self.state = ConnectionState::Authorized;
                info!(user = %self.config.username, level, "rscp authorized");
                Ok(())
            }
            _ => {
                warn!(user = %self.config.username, ?level, "rscp authorization rejected");
                Err(rejected())
            }
        }
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Authorized => self.write_frame(frame).await,
            ConnectionState::Connected => Err(ConnectionError::NotAuthorized),
            ConnectionState::Disconnected => Err(ConnectionError::NotConnected),
        }
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        match self.state {
            ConnectionState::Authorized => self.read_frame().await,
            ConnectionState::Connected => Err(ConnectionError::NotAuthorized),
            ConnectionState::Disconnected => Err(ConnectionError::NotConnected),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(error = %err, "rscp shutdown failed");
            }
            info!(host = %self.config.host, "rscp disconnected");
        }
        self.teardown();
    }
}

/// Reads until a whole number of cipher blocks has arrived.
async fn read_blocks(
    stream: &mut TcpStream,
    timeout_ms: u64,
    max_frame_size: usize,
) -> Result<Vec<u8>, ConnectionError> {
    let mut buf = Vec::with_capacity(4 * BLOCK_SIZE);
    let mut chunk = vec![0u8; 4096];

    loop {
        let read = timeout(Duration::from_millis(timeout_ms), stream.read(&mut chunk)).await;
        match read {
            Ok(Ok(0)) => return Err(ConnectionError::Closed),
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(err)) => return Err(ConnectionError::Io(err)),
            Err(_) => return Err(ConnectionError::Timeout { timeout_ms }),
        }

        if buf.len() > max_frame_size {
            return Err(ConnectionError::FrameTooLarge {
                max: max_frame_size,
            });
        }
        if buf.len() % BLOCK_SIZE == 0 {
            return Ok(buf);
        }
    }
}
