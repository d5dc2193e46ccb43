//! Valkey (Redis-compatible) distributed cache client.
//!
//! # Responsibilities
//! - Speak RESP2 over a single tokio TCP connection
//! - Authenticate and select the database on connect
//! - Drop the connection after any I/O or framing error and reconnect lazily
//! - Never reuse a connection whose request was abandoned mid-reply
//!
//! # Design Decisions
//! - One connection, one request in flight; callers are already bounded by
//!   the guard's operation timeout
//! - Server error replies keep the connection, they are not transport faults

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::cache::distributed::DistributedCache;
use crate::cache::resp::{self, RespValue};
use crate::config::ValkeyConfig;
use crate::error::CacheError;

#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Connection {
    async fn request(&mut self, args: &[&str]) -> Result<RespValue, CacheError> {
        let parts: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        let mut out = BytesMut::new();
        resp::encode_command(&parts, &mut out);
        self.stream.write_all(&out).await?;

        loop {
            if let Some(value) = resp::decode(&mut self.read_buf)? {
                return Ok(value);
            }
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(CacheError::Unavailable("connection closed by server".into()));
            }
        }
    }
}

fn expect_ok(reply: RespValue, command: &str) -> Result<(), CacheError> {
    match reply {
        RespValue::Simple(ref s) if s == "OK" => Ok(()),
        RespValue::Error(message) => Err(CacheError::protocol(format!("{command}: {message}"))),
        other => Err(CacheError::protocol(format!("{command}: unexpected reply {other:?}"))),
    }
}

#[derive(Debug)]
pub struct ValkeyDistributedCache {
    config: ValkeyConfig,
    connection: Mutex<Option<Connection>>,
}

impl ValkeyDistributedCache {
    pub fn new(config: ValkeyConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection, CacheError> {
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| CacheError::timeout("connect"))??;
        stream.set_nodelay(true)?;

        let mut connection = Connection {
            stream,
            read_buf: BytesMut::with_capacity(4096),
        };

        if let Some(password) = &self.config.password {
            let reply = connection.request(&["AUTH", password.as_str()]).await?;
            expect_ok(reply, "AUTH")?;
        }
        if self.config.database != 0 {
            let db = self.config.database.to_string();
            let reply = connection.request(&["SELECT", db.as_str()]).await?;
            expect_ok(reply, "SELECT")?;
        }

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            database = self.config.database,
            "Connected to Valkey"
        );
        Ok(connection)
    }

    /// Run one command. The connection is out of the slot while the request
    /// is in flight and goes back only after a complete reply, so a caller
    /// dropped mid-request leaves the slot empty and the next call reconnects
    /// instead of reading the stale reply.
    async fn execute(&self, args: &[&str]) -> Result<RespValue, CacheError> {
        let mut guard = self.connection.lock().await;
        let mut connection = match guard.take() {
            Some(connection) => connection,
            None => self.connect().await?,
        };

        let reply = connection.request(args).await?;
        *guard = Some(connection);
        match reply {
            RespValue::Error(message) => Err(CacheError::protocol(message)),
            value => Ok(value),
        }
    }
}

#[async_trait]
impl DistributedCache for ValkeyDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.execute(&["GET", key]).await? {
            RespValue::Bulk(None) => Ok(None),
            RespValue::Bulk(Some(data)) => String::from_utf8(data.to_vec())
                .map(Some)
                .map_err(|e| CacheError::protocol(e.to_string())),
            other => Err(CacheError::protocol(format!("GET: unexpected reply {other:?}"))),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let reply = match ttl.map(|ttl| ttl.as_secs()).filter(|secs| *secs > 0) {
            Some(secs) => {
                let secs = secs.to_string();
                self.execute(&["SET", key, value, "EX", secs.as_str()])
                    .await?
            }
            None => self.execute(&["SET", key, value]).await?,
        };
        expect_ok(reply, "SET")
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        match self.execute(&["DEL", key]).await? {
            RespValue::Integer(n) => Ok(n > 0),
            other => Err(CacheError::protocol(format!("DEL: unexpected reply {other:?}"))),
        }
    }

    async fn is_healthy(&self) -> bool {
        matches!(
            self.execute(&["PING"]).await,
            Ok(RespValue::Simple(ref s)) if s == "PONG"
        )
    }
}
