//! Redis backend.

use super::backend::{ttl_secs, CacheBackend};
use async_trait::async_trait;
use overlay_core::{glob_escape, CacheError, CacheResult};
use redis::aio::ConnectionManager;
use redis::{FromRedisValue, RedisResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

const SCAN_COUNT: usize = 500;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Redis connection configuration.
#[derive(Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/0`.
    pub url: String,
    /// Prepended to every key.
    pub key_prefix: String,
    pub connect_timeout: Duration,
    /// Upper bound on a single command round trip.
    pub operation_timeout: Duration,
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &"<redacted>")
            .field("key_prefix", &self.key_prefix)
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    /// Read configuration through `lookup`.
    ///
    /// `REDIS_URL` wins; otherwise the URL is assembled from `REDIS_HOST`,
    /// `REDIS_PORT`, `REDIS_DB` and `REDIS_PASSWORD`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let url = match lookup("REDIS_URL").filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => match lookup("REDIS_HOST") {
                Some(host) => {
                    let port: u16 = lookup("REDIS_PORT")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(6379);
                    let db: u32 = lookup("REDIS_DB")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    let auth = lookup("REDIS_PASSWORD")
                        .filter(|p| !p.is_empty())
                        .map(|p| format!(":{}@", urlencoding::encode(&p)))
                        .unwrap_or_default();
                    format!("redis://{}{}:{}/{}", auth, host, port, db)
                }
                None => defaults.url,
            },
        };

        Self {
            url,
            key_prefix: lookup("REDIS_KEY_PREFIX").unwrap_or_default(),
            connect_timeout: lookup("REDIS_CONNECT_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            operation_timeout: lookup("REDIS_OP_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.operation_timeout),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

// ============================================================================
// BACKEND
// ============================================================================

/// Cache backend over a multiplexed, auto-reconnecting Redis connection.
pub struct RedisCacheBackend {
    conn: Mutex<Option<ConnectionManager>>,
    prefix: String,
    operation_timeout: Duration,
}

impl fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("conn", &"<ConnectionManager>")
            .field("prefix", &self.prefix)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl RedisCacheBackend {
    /// Open a connection. Fails if Redis cannot be reached within the
    /// connect timeout.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let client =
            redis::Client::open(config.url.as_str()).map_err(|e| CacheError::backend("connect", e))?;
        let conn = match tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(CacheError::backend("connect", e)),
            Err(_) => return Err(CacheError::backend("connect", "connection timed out")),
        };

        tracing::info!(prefix = %config.key_prefix, "Connected to Redis");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            prefix: config.key_prefix.clone(),
            operation_timeout: config.operation_timeout,
        })
    }

    fn connection(&self, op: &'static str) -> CacheResult<ConnectionManager> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| CacheError::backend(op, "connection lock poisoned"))?;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| CacheError::backend(op, "connection closed"))
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    fn keys(&self, keys: &[String]) -> Vec<String> {
        keys.iter().map(|k| self.key(k)).collect()
    }

    async fn run<T>(&self, op: &'static str, cmd: redis::Cmd) -> CacheResult<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.connection(op)?;
        let fut = async move {
            let result: RedisResult<T> = cmd.query_async(&mut conn).await;
            result
        };
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::backend(op, e)),
            Err(_) => Err(CacheError::backend(op, "operation timed out")),
        }
    }
}

/// Score bound in the form `ZRANGEBYSCORE` accepts.
fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.key(key));
        self.run("get", cmd).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        self.run("set", cmd).await
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.keys(keys));
        self.run("del", cmd).await
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let full_pattern = format!("{}{}", glob_escape(&self.prefix), pattern);
        let mut cursor: u64 = 0;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT);
            let (next, batch): (u64, Vec<String>) = self.run("scan", cmd).await?;
            for key in batch {
                let stripped = key
                    .strip_prefix(self.prefix.as_str())
                    .unwrap_or(key.as_str())
                    .to_string();
                // SCAN may return a key more than once
                if seen.insert(stripped.clone()) {
                    keys.push(stripped);
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(self.key(key));
        let count: u64 = self.run("exists", cmd).await?;
        Ok(count > 0)
    }

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.key(key));
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _added: u64 = self.run("hset", cmd).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(self.key(key)).arg(field);
        self.run("hget", cmd).await
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(self.key(key));
        self.run("hgetall", cmd).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(self.key(key)).arg(fields);
        self.run("hdel", cmd).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("SADD");
        cmd.arg(self.key(key)).arg(members);
        self.run("sadd", cmd).await
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(self.key(key));
        self.run("smembers", cmd).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("SREM");
        cmd.arg(self.key(key)).arg(members);
        self.run("srem", cmd).await
    }

    async fn scard(&self, key: &str) -> CacheResult<u64> {
        let mut cmd = redis::cmd("SCARD");
        cmd.arg(self.key(key));
        self.run("scard", cmd).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(self.key(key)).arg(score).arg(member);
        let _added: u64 = self.run("zadd", cmd).await?;
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        let mut cmd = redis::cmd("ZRANGE");
        cmd.arg(self.key(key)).arg(start).arg(stop);
        self.run("zrange", cmd).await
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        let mut cmd = redis::cmd("ZREVRANGE");
        cmd.arg(self.key(key)).arg(start).arg(stop);
        self.run("zrevrange", cmd).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(self.key(key)).arg(score_arg(min)).arg(score_arg(max));
        self.run("zrangebyscore", cmd).await
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(self.key(key)).arg(members);
        self.run("zrem", cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(self.key(key)).arg(ttl_secs(ttl));
        let applied: u64 = self.run("expire", cmd).await?;
        Ok(applied == 1)
    }

    async fn ping(&self) -> CacheResult<()> {
        let pong: String = self.run("ping", redis::cmd("PING")).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::backend("ping", format!("unexpected reply {:?}", pong)))
        }
    }

    async fn close(&self) -> CacheResult<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| CacheError::backend("close", "connection lock poisoned"))?;
        if guard.take().is_some() {
            tracing::info!("Closed Redis connection");
        }
        Ok(())
    }
}
