/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, warn};
use redis::aio::MultiplexedConnection;
use redis::{
    AsyncCommands, AsyncConnectionConfig, ProtocolVersion, RedisConnectionInfo, RedisResult,
};
use tokio::net::TcpStream;
use tokio::time::Instant;
use url::Url;

use super::{CacheError, ContextCache};

pub const REDIS_DEFAULT_PORT: u16 = 6379;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RedisCacheConfig {
    host: String,
    port: u16,
    db: i64,
    username: Option<String>,
    password: Option<String>,
    connect_timeout: Duration,
    response_timeout: Duration,
    reconnect_interval: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        RedisCacheConfig::new("127.0.0.1", REDIS_DEFAULT_PORT)
    }
}

impl fmt::Display for RedisCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl RedisCacheConfig {
    pub fn new(host: &str, port: u16) -> Self {
        RedisCacheConfig {
            host: host.to_string(),
            port,
            db: 0,
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(5),
        }
    }

    /// Parse `host`, `host:port` or `[v6]:port`.
    pub fn set_addr(&mut self, addr: &str) -> anyhow::Result<()> {
        let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| anyhow!("unclosed bracket in address {addr}"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(anyhow!("invalid address {addr}")),
            }
        } else {
            match addr.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                Some(_) => (addr, None),
                None => (addr, None),
            }
        };
        if host.is_empty() {
            return Err(anyhow!("empty host in address {addr}"));
        }
        let port = match port {
            Some(s) => s
                .parse::<u16>()
                .map_err(|e| anyhow!("invalid port in address {addr}: {e}"))?,
            None => REDIS_DEFAULT_PORT,
        };
        self.host = host.to_string();
        self.port = port;
        Ok(())
    }

    /// Parse `redis://[user[:password]@]host[:port][/db]`.
    pub fn set_url(&mut self, url: &str) -> anyhow::Result<()> {
        let url = Url::parse(url).map_err(|e| anyhow!("invalid redis url: {e}"))?;
        if url.scheme() != "redis" {
            return Err(anyhow!("unsupported redis url scheme {}", url.scheme()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("no host found in redis url"))?;
        self.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        self.port = url.port().unwrap_or(REDIS_DEFAULT_PORT);
        if !url.username().is_empty() {
            self.username = Some(url.username().to_string());
        }
        if let Some(password) = url.password() {
            self.password = Some(password.to_string());
        }
        let db = url.path().trim_start_matches('/');
        if !db.is_empty() {
            self.db = db
                .parse::<i64>()
                .map_err(|e| anyhow!("invalid db number {db} in redis url: {e}"))?;
        }
        Ok(())
    }

    pub fn set_db(&mut self, db: i64) {
        self.db = db;
    }

    pub fn set_username(&mut self, name: String) {
        self.username = Some(name);
    }

    pub fn set_password(&mut self, password: String) {
        self.password = Some(password);
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.reconnect_interval = interval;
    }

    fn db_info(&self) -> RedisConnectionInfo {
        let mut info = RedisConnectionInfo::default()
            .set_db(self.db)
            .set_protocol(ProtocolVersion::RESP3);
        if let Some(username) = &self.username {
            info = info.set_username(username);
        }
        if let Some(password) = &self.password {
            info = info.set_password(password);
        }
        info
    }

    /// Connect and handshake, both bounded by the connect timeout.
    async fn connect(&self) -> Result<MultiplexedConnection, CacheError> {
        match tokio::time::timeout(self.connect_timeout, self.connect_and_handshake()).await {
            Ok(r) => r,
            Err(_) => Err(CacheError::ConnectTimeout(self.to_string())),
        }
    }

    async fn connect_and_handshake(&self) -> Result<MultiplexedConnection, CacheError> {
        let peer = self.to_string();
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| CacheError::Resolve(peer.clone(), e))?;
        let Some(addr) = addrs.next() else {
            return Err(CacheError::Resolve(
                peer,
                std::io::Error::other("no address resolved"),
            ));
        };

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CacheError::Connect(peer.clone(), e))?;
        let _ = stream.set_nodelay(true);

        let async_config = AsyncConnectionConfig::new().set_response_timeout(Some(self.response_timeout));
        let (conn, background) =
            MultiplexedConnection::new_with_config(&self.db_info(), stream, async_config)
                .await
                .map_err(|e| CacheError::Handshake(peer, e))?;
        tokio::spawn(background);
        Ok(conn)
    }
}

struct ConnState {
    conn: Option<MultiplexedConnection>,
    failed_at: Option<Instant>,
    connecting: bool,
}

/// Clears the connecting mark, even if the connecting future is dropped.
struct ConnectingGuard<'a>(&'a Mutex<ConnState>);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.0).connecting = false;
    }
}

fn lock_state(state: &Mutex<ConnState>) -> MutexGuard<'_, ConnState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Redis backed cache using one lazily established multiplexed connection.
///
/// Only one connect attempt is in flight at any time, other callers get
/// `Unavailable` meanwhile. After a failure the connection is dropped, and no
/// new connection attempt is made within the reconnect interval.
pub struct RedisCache {
    config: RedisCacheConfig,
    state: Mutex<ConnState>,
}

impl RedisCache {
    pub fn new(config: RedisCacheConfig) -> Self {
        RedisCache {
            config,
            state: Mutex::new(ConnState {
                conn: None,
                failed_at: None,
                connecting: false,
            }),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        {
            let mut state = lock_state(&self.state);
            if let Some(conn) = &state.conn {
                return Ok(conn.clone());
            }
            if state.connecting {
                return Err(CacheError::Unavailable(self.config.to_string()));
            }
            if let Some(failed_at) = state.failed_at {
                if failed_at.elapsed() < self.config.reconnect_interval {
                    return Err(CacheError::Unavailable(self.config.to_string()));
                }
            }
            state.connecting = true;
        }

        let _connecting = ConnectingGuard(&self.state);
        let r = self.config.connect().await;

        let mut state = lock_state(&self.state);
        match r {
            Ok(conn) => {
                debug!("connected to redis server {}", self.config);
                state.conn = Some(conn.clone());
                state.failed_at = None;
                Ok(conn)
            }
            Err(e) => {
                state.failed_at = Some(Instant::now());
                Err(e)
            }
        }
    }

    fn reset(&self) {
        let mut state = lock_state(&self.state);
        if state.conn.take().is_some() {
            warn!("dropped connection to redis server {}", self.config);
        }
        state.failed_at = Some(Instant::now());
    }
}

#[async_trait]
impl ContextCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let r: RedisResult<Option<String>> = conn.get(key).await;
        match r {
            Ok(v) => Ok(v),
            Err(e) => {
                self.reset();
                Err(e.into())
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let r: RedisResult<()> = conn.set_ex(key, value, super::ttl_secs(ttl)).await;
        match r {
            Ok(_) => Ok(()),
            Err(e) => {
                self.reset();
                Err(e.into())
            }
        }
    }
}
