//! Redis-backed sorted-set store
//!
//! Snapshots are written with a single MULTI/EXEC pipeline (DEL, ZADD,
//! EXPIRE) and published with a second transaction that moves the pointer
//! and retires the previous snapshot. Every command runs under a timeout so a
//! stalled connection surfaces as [`CacheError::Timeout`] instead of hanging
//! the caller.

use crate::{CacheError, CacheMetrics, CacheResult, Retire, ScoredMember, SortedSetStore};
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, Script};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Members per ZADD command when staging a snapshot
const ZADD_CHUNK: usize = 500;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisSortedSetStore {
    conn: ConnectionManager,
    command_timeout: Duration,
    metrics: CacheMetrics,
}

impl RedisSortedSetStore {
    /// Connect to Redis and build a connection manager
    pub async fn connect(redis_url: &str, command_timeout: Option<Duration>) -> CacheResult<Self> {
        let info = redis_url.into_connection_info()?;
        let client = Client::open(info)?;
        let conn = ConnectionManager::new(client).await?;

        debug!("Redis sorted-set store connected");

        Ok(Self::from_manager(
            conn,
            command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
        ))
    }

    pub fn from_manager(conn: ConnectionManager, command_timeout: Duration) -> Self {
        Self {
            conn,
            command_timeout,
            metrics: CacheMetrics::new(),
        }
    }

    /// Ping Redis to check connection health
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.run("ping", "", redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await?;
        Ok(())
    }

    async fn run<F, T>(&self, op: &str, key: &str, future: F) -> CacheResult<T>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.command_timeout, future).await {
            Ok(Ok(value)) => {
                self.metrics.record_ok(op, key);
                Ok(value)
            }
            Ok(Err(e)) => {
                warn!(op, key, error = %e, "Redis command failed");
                self.metrics.record_error(op, key);
                Err(CacheError::Redis(e))
            }
            Err(_) => {
                warn!(op, key, timeout_ms = self.command_timeout.as_millis() as u64, "Redis command timed out");
                self.metrics.record_error(op, key);
                Err(CacheError::Timeout(self.command_timeout))
            }
        }
    }

    async fn range(
        &self,
        command: &'static str,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        let mut conn = self.conn.clone();
        let rows: Vec<(String, f64)> = self
            .run(
                command,
                key,
                redis::cmd(command)
                    .arg(key)
                    .arg(start)
                    .arg(stop)
                    .arg("WITHSCORES")
                    .query_async(&mut conn),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }
}

#[async_trait::async_trait]
impl SortedSetStore for RedisSortedSetStore {
    async fn replace_sorted_set(
        &self,
        key: &str,
        members: &[ScoredMember],
        ttl_secs: u64,
    ) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("DEL").arg(key).ignore();

        if !members.is_empty() {
            for chunk in members.chunks(ZADD_CHUNK) {
                let mut zadd = redis::cmd("ZADD");
                zadd.arg(key);
                for m in chunk {
                    zadd.arg(m.score).arg(&m.member);
                }
                pipe.add_command(zadd).ignore();
            }
            pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
        }

        let mut conn = self.conn.clone();
        self.run("replace", key, pipe.query_async::<_, ()>(&mut conn))
            .await?;

        debug!(key = %key, members = members.len(), ttl = ttl_secs, "Sorted set replaced");
        Ok(())
    }

    async fn range_by_rank_desc(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.range("ZREVRANGE", key, start, stop).await
    }

    async fn range_by_rank(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.range("ZRANGE", key, start, stop).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        self.run(
            "exists",
            key,
            redis::cmd("EXISTS").arg(key).query_async::<_, bool>(&mut conn),
        )
        .await
    }

    async fn cardinality(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        self.run(
            "zcard",
            key,
            redis::cmd("ZCARD").arg(key).query_async::<_, u64>(&mut conn),
        )
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.run(
            "del",
            key,
            redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.run(
            "get",
            key,
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn),
        )
        .await
    }

    async fn set_string(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl);
        }

        let mut conn = self.conn.clone();
        self.run("set", key, cmd.query_async::<_, ()>(&mut conn))
            .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis: i64 = self
            .run(
                "pttl",
                key,
                redis::cmd("PTTL").arg(key).query_async(&mut conn),
            )
            .await?;

        // -2: missing, -1: no expiry
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    async fn incr(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        self.run(
            "incr",
            key,
            redis::cmd("INCR").arg(key).query_async::<_, u64>(&mut conn),
        )
        .await
    }

    async fn swap_pointer(
        &self,
        pointer_key: &str,
        value: &str,
        ttl_secs: u64,
        retire: Option<Retire<'_>>,
    ) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("SET")
            .arg(pointer_key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .ignore();

        if let Some(old) = retire {
            pipe.cmd("EXPIRE")
                .arg(old.key)
                .arg(old.grace_secs.max(1))
                .ignore();
        }

        let mut conn = self.conn.clone();
        self.run("swap", pointer_key, pipe.query_async::<_, ()>(&mut conn))
            .await
    }

    async fn try_acquire_lease(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .run(
                "lease_acquire",
                key,
                redis::cmd("SET")
                    .arg(key)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(reply.is_some())
    }

    async fn release_lease(&self, key: &str, token: &str) -> CacheResult<bool> {
        let script = Script::new(RELEASE_LEASE_SCRIPT);
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .run(
                "lease_release",
                key,
                script.key(key).arg(token).invoke_async(&mut conn),
            )
            .await?;

        Ok(deleted == 1)
    }
}
