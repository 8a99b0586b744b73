// src/core/store/client.rs

//! A small asynchronous RESP client for the Redis-compatible shared store.

use super::connection::{Connector, StoreConnection};
use super::stream::{AnyStream, upgrade_to_tls};
use crate::config::RedisConfig;
use crate::core::MoonshipError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_PORT: u16 = 6379;

/// Framed RESP connection over TCP or TLS.
pub type RespConnection = Framed<AnyStream, RespFrameCodec>;

/// Everything needed to open a connection to the store, parsed from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub verify_cert: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Endpoint {
    /// Parses and validates the store address. Fails before any network activity.
    pub fn from_config(config: &RedisConfig) -> Result<Self, MoonshipError> {
        let resolved = match config
            .resolved_url()
            .map_err(|e| MoonshipError::StartUp(e.to_string()))?
        {
            Some(url) if !url.trim().is_empty() => url,
            _ => return Err(MoonshipError::StartUp("Redis URL not configured".into())),
        };

        let url = Url::parse(resolved.trim())
            .map_err(|e| MoonshipError::StartUp(format!("Invalid Redis URL: {e}")))?;
        let tls = match url.scheme() {
            "redis" => false,
            "rediss" => true,
            other => {
                return Err(MoonshipError::StartUp(format!(
                    "Unsupported Redis URL scheme '{other}'"
                )));
            }
        };
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.trim_matches(['[', ']']).to_string(),
            _ => return Err(MoonshipError::StartUp("Redis URL has no host".into())),
        };
        let username = match url.username() {
            "" => None,
            user => Some(decode_component(user)?),
        };
        let password = url.password().map(decode_component).transpose()?;
        let database = match url.path().trim_start_matches('/') {
            "" => 0,
            db => db.parse::<u32>().map_err(|_| {
                MoonshipError::StartUp(format!("Invalid Redis database index '{db}'"))
            })?,
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            tls,
            verify_cert: config.ssl_verify_cert,
            username,
            password,
            database,
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Opens a new connection, performing TLS, `AUTH` and `SELECT` as configured.
    pub async fn connect(&self) -> Result<RespConnection, MoonshipError> {
        let addr = self.address();
        debug!("Connecting to shared store at {}", addr);
        let tcp_stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MoonshipError::Transport(format!("Timed out connecting to {addr}")))?
            .map_err(|e| MoonshipError::Transport(format!("Failed to connect to {addr}: {e}")))?;
        tcp_stream.set_nodelay(true)?;

        let stream = if self.tls {
            info!("Establishing TLS connection with shared store at {addr}");
            tokio::time::timeout(
                self.connect_timeout,
                upgrade_to_tls(tcp_stream, &self.host, self.verify_cert),
            )
            .await
            .map_err(|_| MoonshipError::Transport(format!("TLS handshake with {addr} timed out")))??
        } else {
            AnyStream::Tcp(tcp_stream)
        };

        let mut framed = Framed::new(stream, RespFrameCodec);

        if let Some(password) = &self.password {
            let mut parts = vec![Bytes::from_static(b"AUTH")];
            if let Some(user) = &self.username {
                parts.push(Bytes::from(user.clone()));
            }
            parts.push(Bytes::from(password.clone()));
            let reply = send_and_receive(&mut framed, RespFrame::command(parts), self.command_timeout).await?;
            reply.into_result().map_err(|e| {
                MoonshipError::StartUp(format!("Authentication with the shared store failed: {e}"))
            })?;
        }

        if self.database != 0 {
            let select = RespFrame::command([
                Bytes::from_static(b"SELECT"),
                Bytes::from(self.database.to_string()),
            ]);
            send_and_receive(&mut framed, select, self.command_timeout)
                .await?
                .into_result()?;
        }

        Ok(framed)
    }
}

fn decode_component(value: &str) -> Result<String, MoonshipError> {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| MoonshipError::StartUp("Redis URL credentials are not valid UTF-8".into()))
}

/// Builds a command frame from string arguments.
pub fn command(parts: &[&str]) -> RespFrame {
    RespFrame::command(parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())))
}

/// Sends a single frame and waits for a single reply frame.
async fn send_and_receive(
    framed: &mut RespConnection,
    frame: RespFrame,
    timeout: Duration,
) -> Result<RespFrame, MoonshipError> {
    framed.send(frame).await?;
    read_reply(framed, timeout).await
}

async fn read_reply(framed: &mut RespConnection, timeout: Duration) -> Result<RespFrame, MoonshipError> {
    match tokio::time::timeout(timeout, framed.next()).await {
        Ok(Some(Ok(frame))) => Ok(frame),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Err(MoonshipError::Transport("Connection closed by peer".into())),
        Err(_) => Err(MoonshipError::Transport(
            "Read timeout while waiting for response".into(),
        )),
    }
}

/// A command connection shared by every cache user in the process.
///
/// Requests are serialized through a mutex; a caller that needs several round
/// trips without interleaving (e.g. `WATCH` … `EXEC`) holds a [`ClientGuard`].
/// A socket dropped after a transport failure is reopened by the next round trip.
pub struct RespClient {
    endpoint: Endpoint,
    state: Mutex<ClientState>,
}

struct ClientState {
    conn: Option<RespConnection>,
    closed: bool,
}

impl RespClient {
    pub async fn connect(endpoint: Endpoint) -> Result<Self, MoonshipError> {
        let conn = endpoint.connect().await?;
        Ok(Self::from_connection(endpoint, conn))
    }

    /// Wraps an already-established connection.
    pub fn from_connection(endpoint: Endpoint, conn: RespConnection) -> Self {
        Self {
            endpoint,
            state: Mutex::new(ClientState {
                conn: Some(conn),
                closed: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Takes exclusive use of the connection.
    pub async fn lock(&self) -> ClientGuard<'_> {
        ClientGuard {
            state: self.state.lock().await,
            endpoint: &self.endpoint,
        }
    }

    /// Executes one command and returns its raw reply.
    pub async fn execute(&self, command: RespFrame) -> Result<RespFrame, MoonshipError> {
        let mut replies = self.lock().await.round_trip(vec![command]).await?;
        replies
            .pop()
            .ok_or_else(|| MoonshipError::Protocol("missing reply".into()))
    }

    /// Sends several commands in one round trip and returns one reply per command.
    pub async fn pipeline(&self, commands: Vec<RespFrame>) -> Result<Vec<RespFrame>, MoonshipError> {
        self.lock().await.round_trip(commands).await
    }
}

#[async_trait::async_trait]
impl StoreConnection for RespClient {
    async fn close(&self) -> Result<(), MoonshipError> {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(mut conn) = state.conn.take() {
            conn.get_mut().shutdown().await?;
        }
        Ok(())
    }
}

/// Exclusive access to the client connection for a sequence of round trips.
pub struct ClientGuard<'a> {
    state: MutexGuard<'a, ClientState>,
    endpoint: &'a Endpoint,
}

impl ClientGuard<'_> {
    /// Writes every frame, flushes once, then reads exactly one reply per frame.
    ///
    /// Any transport failure drops the socket: the reply stream can no longer be
    /// matched to requests. The failing call reports its error and the next
    /// round trip opens a fresh socket.
    pub async fn round_trip(&mut self, frames: Vec<RespFrame>) -> Result<Vec<RespFrame>, MoonshipError> {
        if self.state.closed {
            return Err(MoonshipError::Transport(
                "Connection to the shared store is closed".into(),
            ));
        }
        if self.state.conn.is_none() {
            info!("Reconnecting to shared store at {}", self.endpoint.address());
            let conn = self.endpoint.connect().await?;
            self.state.conn = Some(conn);
        }
        let conn = self
            .state
            .conn
            .as_mut()
            .ok_or_else(|| MoonshipError::Transport("Shared store socket unavailable".into()))?;

        let expected = frames.len();
        let timeout = self.endpoint.command_timeout;
        let result = async {
            for frame in frames {
                conn.feed(frame).await?;
            }
            conn.flush().await?;
            let mut replies = Vec::with_capacity(expected);
            for _ in 0..expected {
                replies.push(read_reply(conn, timeout).await?);
            }
            Ok::<_, MoonshipError>(replies)
        }
        .await;

        if let Err(e) = &result {
            warn!("Dropping shared store socket after transport failure: {}", e);
            self.state.conn = None;
        }
        result
    }
}

/// Builds [`RespClient`] connections for a [`ConnectionManager`](super::ConnectionManager).
#[derive(Debug, Clone)]
pub struct RespConnector {
    endpoint: Endpoint,
}

impl RespConnector {
    /// Validates the address configuration; no connection is attempted here.
    pub fn from_config(config: &RedisConfig) -> Result<Self, MoonshipError> {
        Ok(Self {
            endpoint: Endpoint::from_config(config)?,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Connector for RespConnector {
    type Connection = RespClient;

    async fn connect(&self) -> Result<RespClient, MoonshipError> {
        RespClient::connect(self.endpoint.clone()).await
    }
}
