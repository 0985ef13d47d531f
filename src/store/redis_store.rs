//! Redis counter store
//!
//! Each operation is one `EVALSHA` of a Lua script, so the check and the
//! increments run as a single unit on the Redis server. Counters are hashes
//! with `reserved` and `used` fields; an open reservation is a list holding
//! the reserved amount followed by the counter keys it holds. Commit and
//! release read those keys from the list rather than from the caller. Every
//! write refreshes the key TTL, which is the backstop for reservations whose
//! caller vanished.
//!
//! All keys touched by one script must live on the same node, so a Redis
//! Cluster deployment needs a hash-tagged `key_prefix` such as `{tokengate}:`.

use super::{
    CounterStore, ReserveOutcome, ResolveOutcome, ScopeCounters, ScopeShortfall, StoreError,
};
use crate::config::StoreConfig;
use crate::scope::ScopeKey;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;

/// KEYS[1] reservation record, KEYS[2..] counters.
/// ARGV[1] amount, ARGV[2] ttl seconds, ARGV[3..] limit per counter (-1 = none).
/// Returns {1} on success, {-1} if the id exists, or
/// {0, index, used, reserved, ...} for every failing counter.
const RESERVE_SCRIPT: &str = r#"
local amount = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
if redis.call('EXISTS', KEYS[1]) == 1 then
  return {-1}
end
local failed = {0}
for i = 2, #KEYS do
  local limit = tonumber(ARGV[i + 1])
  local used = tonumber(redis.call('HGET', KEYS[i], 'used') or 0)
  local reserved = tonumber(redis.call('HGET', KEYS[i], 'reserved') or 0)
  if limit >= 0 and used + reserved + amount > limit then
    table.insert(failed, i - 2)
    table.insert(failed, used)
    table.insert(failed, reserved)
  end
end
if #failed > 1 then
  return failed
end
local record = {amount}
for i = 2, #KEYS do
  redis.call('HINCRBY', KEYS[i], 'reserved', amount)
  redis.call('EXPIRE', KEYS[i], ttl)
  record[#record + 1] = KEYS[i]
end
redis.call('RPUSH', KEYS[1], unpack(record))
redis.call('EXPIRE', KEYS[1], ttl)
return {1}
"#;

/// KEYS[1] reservation record.
/// ARGV[1] actual amount (0 for release), ARGV[2] ttl seconds.
/// Returns -1 if the record is gone, otherwise the held amount.
const RESOLVE_SCRIPT: &str = r#"
local record = redis.call('LRANGE', KEYS[1], 0, -1)
if #record == 0 then
  return -1
end
local held = tonumber(record[1])
local actual = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
for i = 2, #record do
  local key = record[i]
  local reserved = redis.call('HINCRBY', key, 'reserved', -held)
  if reserved < 0 then
    redis.call('HSET', key, 'reserved', 0)
  end
  if actual > 0 then
    redis.call('HINCRBY', key, 'used', actual)
  end
  redis.call('EXPIRE', key, ttl)
end
redis.call('DEL', KEYS[1])
return held
"#;

/// Redis-backed [`CounterStore`].
///
/// The connection is established lazily so the service can start (and
/// degrade) while Redis is down; the `ConnectionManager` reconnects on its
/// own once established.
pub struct RedisStore {
    client: redis::Client,
    connection: RwLock<Option<ConnectionManager>>,
    key_prefix: String,
    timeout: Duration,
    connect_timeout: Duration,
    ttl_seconds: u64,
    reserve_script: redis::Script,
    resolve_script: redis::Script,
}

impl RedisStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            key_prefix: config.key_prefix.clone(),
            timeout: config.timeout(),
            connect_timeout: config.connect_timeout(),
            ttl_seconds: config.reservation_ttl().as_secs().max(1),
            reserve_script: redis::Script::new(RESERVE_SCRIPT),
            resolve_script: redis::Script::new(RESOLVE_SCRIPT),
        })
    }

    fn reservation_key(&self, reservation_id: &str) -> String {
        format!("{}reservation:{}", self.key_prefix, reservation_id)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(self.connect_timeout, self.client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "connect",
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!("Connected to Redis counter store");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::from_redis(operation, e)),
            Err(_) => Err(StoreError::Timeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn resolve(
        &self,
        operation: &'static str,
        reservation_id: &str,
        actual: u64,
    ) -> Result<ResolveOutcome, StoreError> {
        let mut conn = self.connection().await?;

        let mut invocation = self.resolve_script.prepare_invoke();
        invocation
            .key(self.reservation_key(reservation_id))
            .arg(actual)
            .arg(self.ttl_seconds);

        let held: i64 = self
            .run(operation, invocation.invoke_async(&mut conn))
            .await?;

        if held < 0 {
            Ok(ResolveOutcome::NotFound)
        } else {
            Ok(ResolveOutcome::Resolved { held: held as u64 })
        }
    }
}

fn parse_reserve_reply(reply: &[i64], reservation_id: &str) -> Result<ReserveOutcome, StoreError> {
    match reply.first() {
        Some(1) => Ok(ReserveOutcome::Reserved),
        Some(-1) => Err(StoreError::DuplicateReservation(reservation_id.to_string())),
        Some(0) if reply.len() > 1 && (reply.len() - 1) % 3 == 0 => {
            let shortfalls = reply[1..]
                .chunks_exact(3)
                .map(|chunk| ScopeShortfall {
                    index: chunk[0].max(0) as usize,
                    counters: ScopeCounters {
                        used: chunk[1].max(0) as u64,
                        reserved: chunk[2].max(0) as u64,
                    },
                })
                .collect();
            Ok(ReserveOutcome::Exceeded(shortfalls))
        }
        _ => Err(StoreError::Protocol {
            operation: "reserve",
            message: format!("malformed script reply {:?}", reply),
        }),
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn reserve(
        &self,
        reservation_id: &str,
        scopes: &[ScopeKey],
        limits: &[Option<u64>],
        amount: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        if scopes.len() != limits.len() {
            return Err(StoreError::Protocol {
                operation: "reserve",
                message: format!("{} scopes but {} limits", scopes.len(), limits.len()),
            });
        }

        let mut conn = self.connection().await?;

        let mut invocation = self.reserve_script.prepare_invoke();
        invocation.key(self.reservation_key(reservation_id));
        for scope in scopes {
            invocation.key(scope.storage_key(&self.key_prefix));
        }
        invocation.arg(amount).arg(self.ttl_seconds);
        for limit in limits {
            match limit {
                Some(limit) => invocation.arg(*limit),
                None => invocation.arg(-1i64),
            };
        }

        let reply: Vec<i64> = self
            .run("reserve", invocation.invoke_async(&mut conn))
            .await?;

        parse_reserve_reply(&reply, reservation_id)
    }

    async fn commit(
        &self,
        reservation_id: &str,
        actual: u64,
    ) -> Result<ResolveOutcome, StoreError> {
        self.resolve("commit", reservation_id, actual).await
    }

    async fn release(&self, reservation_id: &str) -> Result<ResolveOutcome, StoreError> {
        self.resolve("release", reservation_id, 0).await
    }

    async fn counters(&self, scopes: &[ScopeKey]) -> Result<Vec<ScopeCounters>, StoreError> {
        if scopes.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        for scope in scopes {
            pipe.cmd("HMGET")
                .arg(scope.storage_key(&self.key_prefix))
                .arg("reserved")
                .arg("used");
        }

        let rows: Vec<(Option<u64>, Option<u64>)> =
            self.run("counters", pipe.query_async(&mut conn)).await?;

        Ok(rows
            .into_iter()
            .map(|(reserved, used)| ScopeCounters {
                reserved: reserved.unwrap_or(0),
                used: used.unwrap_or(0),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = self
            .run("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
