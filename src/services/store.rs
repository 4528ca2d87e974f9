//! Typed facade over the coordination store.
//!
//! The locking strategies and the keep-alive monitor share a small set of
//! Redis structures. All compound updates go through server-side scripts;
//! a partially applied update would violate the occupancy invariants, so
//! no multi-key change is ever issued as a chain of client-side calls.
//!
//! Key shapes:
//! - `lock:model:{model}:provider:{id}` — provider lock with TTL
//! - `occ:model:{model}` — hash, field `provider-id` -> "1" when occupied
//! - `host:{host}` — hash, field `model` -> acquisition count on that host
//! - `model:{model}:hosts` — set of hosts currently serving the model
//! - `model:{model}:last_host` — most recently acquired host
//! - `keepalive:provider:{model}:{host}` — hash with `keep_alive_seconds`
//! - `keepalive:providers:next_wakeup` — sorted set scored by next ping

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::core::error::{Result, RouterError};

const KEEPALIVE_PREFIX: &str = "keepalive";

/// Replace characters that would break key composition.
fn sanitize(part: &str) -> String {
    part.replace([' ', '\t', '\n'], "_")
}

/// Lock key for one `(model, provider-id)` pair.
pub fn lock_key(model: &str, provider_id: &str) -> String {
    format!(
        "lock:model:{}:provider:{}",
        sanitize(model),
        sanitize(provider_id)
    )
}

/// Occupancy hash for a model.
pub fn occupancy_key(model: &str) -> String {
    format!("occ:model:{}", sanitize(model))
}

/// Per-host acquisition hash.
pub fn host_key(host: &str) -> String {
    format!("host:{}", sanitize(host))
}

/// Set of hosts currently serving a model.
pub fn model_hosts_key(model: &str) -> String {
    format!("model:{}:hosts", sanitize(model))
}

/// Most recently acquired host for a model.
pub fn last_host_key(model: &str) -> String {
    format!("model:{}:last_host", sanitize(model))
}

/// Keep-alive metadata hash for one `(model, host)` pair.
pub fn keepalive_provider_key(model: &str, host: &str) -> String {
    format!(
        "{}:provider:{}:{}",
        KEEPALIVE_PREFIX,
        sanitize(model),
        sanitize(host)
    )
}

/// Sorted set of upcoming keep-alive wakeups.
pub fn keepalive_wakeup_key() -> String {
    format!("{}:providers:next_wakeup", KEEPALIVE_PREFIX)
}

/// Member encoding for the wakeup sorted set.
pub fn keepalive_member(model: &str, host: &str) -> String {
    format!("{}|{}", model, host)
}

/// Split a wakeup member back into `(model, host)`.
pub fn split_keepalive_member(member: &str) -> Option<(String, String)> {
    member
        .split_once('|')
        .map(|(m, h)| (m.to_string(), h.to_string()))
}

// Acquire: lock with TTL, then occupancy + host bookkeeping, atomically.
// KEYS: lock, occ hash, host hash, hosts set, last_host
// ARGV: ttl_secs, provider_id, model, host
const ACQUIRE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[1]) then
    redis.call('HSET', KEYS[2], ARGV[2], '1')
    redis.call('HINCRBY', KEYS[3], ARGV[3], 1)
    redis.call('SADD', KEYS[4], ARGV[4])
    redis.call('SET', KEYS[5], ARGV[4])
    return 1
end
return 0
"#;

// Release: drop the lock and unwind the bookkeeping. When the host no
// longer serves the model, it leaves the model's host set.
// KEYS: lock, occ hash, host hash, hosts set
// ARGV: provider_id, model, host
const RELEASE_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
redis.call('HDEL', KEYS[2], ARGV[1])
local remaining = redis.call('HINCRBY', KEYS[3], ARGV[2], -1)
if remaining <= 0 then
    redis.call('HDEL', KEYS[3], ARGV[2])
    redis.call('SREM', KEYS[4], ARGV[3])
end
return 1
"#;

fn store_err(e: redis::RedisError) -> RouterError {
    RouterError::StoreUnavailable(e.to_string())
}

/// Async client for the coordination store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    acquire_script: Script,
    release_script: Script,
}

impl RedisStore {
    /// Connect to the store; fails fast when the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        Ok(RedisStore {
            conn,
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Atomically acquire the provider lock and record occupancy.
    ///
    /// Returns `false` when the lock is already held.
    pub async fn acquire_provider(
        &self,
        model: &str,
        provider_id: &str,
        host: &str,
        ttl_secs: u64,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: i64 = self
            .acquire_script
            .key(lock_key(model, provider_id))
            .key(occupancy_key(model))
            .key(host_key(host))
            .key(model_hosts_key(model))
            .key(last_host_key(model))
            .arg(ttl_secs)
            .arg(provider_id)
            .arg(model)
            .arg(host)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(acquired == 1)
    }

    /// Atomically release the provider lock and unwind occupancy.
    pub async fn release_provider(
        &self,
        model: &str,
        provider_id: &str,
        host: &str,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_script
            .key(lock_key(model, provider_id))
            .key(occupancy_key(model))
            .key(host_key(host))
            .key(model_hosts_key(model))
            .arg(provider_id)
            .arg(model)
            .arg(host)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Extend the TTL of a held provider lock (multi-shot sub-requests).
    pub async fn refresh_provider_lock(
        &self,
        model: &str,
        provider_id: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .expire(lock_key(model, provider_id), ttl_secs as i64)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Whether a `(model, provider)` pair is currently occupied.
    pub async fn is_provider_occupied(&self, model: &str, provider_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .hget(occupancy_key(model), provider_id)
            .await
            .map_err(store_err)?;
        Ok(value.as_deref() == Some("1"))
    }

    /// Hosts currently serving a model.
    pub async fn model_hosts(&self, model: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(model_hosts_key(model)).await.map_err(store_err)
    }

    /// Most recently acquired host for a model, if any.
    pub async fn last_host(&self, model: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(last_host_key(model)).await.map_err(store_err)
    }

    /// Drop a stale `last_host` pointer.
    pub async fn clear_last_host(&self, model: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(last_host_key(model)).await.map_err(store_err)?;
        Ok(())
    }

    /// Per-model acquisition counts on a host.
    pub async fn host_occupants(
        &self,
        host: &str,
    ) -> Result<std::collections::HashMap<String, i64>> {
        let mut conn = self.conn.clone();
        conn.hgetall(host_key(host)).await.map_err(store_err)
    }

    /// Whether any model currently holds acquisitions on the host.
    pub async fn host_is_free(&self, host: &str) -> Result<bool> {
        let counts = self.host_occupants(host).await?;
        Ok(counts.values().all(|count| *count <= 0))
    }

    /// Register or refresh a keep-alive schedule entry.
    pub async fn record_keepalive(
        &self,
        model: &str,
        host: &str,
        keep_alive_seconds: u64,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let provider_key = keepalive_provider_key(model, host);
        let member = keepalive_member(model, host);
        let now = chrono::Utc::now().timestamp();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&provider_key, "model_name", model)
            .ignore()
            .hset(&provider_key, "host", host)
            .ignore()
            .hset(
                &provider_key,
                "keep_alive_seconds",
                keep_alive_seconds.to_string(),
            )
            .ignore();

        if keep_alive_seconds > 0 {
            pipe.zadd(
                keepalive_wakeup_key(),
                &member,
                now + keep_alive_seconds as i64,
            )
            .ignore();
        } else {
            pipe.zrem(keepalive_wakeup_key(), &member).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(store_err)?;
        Ok(())
    }

    /// Keep-alive members due at or before `now`.
    pub async fn due_keepalives(&self, now: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrangebyscore(keepalive_wakeup_key(), 0, now)
            .await
            .map_err(store_err)
    }

    /// Configured keep-alive period for a `(model, host)` pair.
    pub async fn keepalive_seconds(&self, model: &str, host: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(keepalive_provider_key(model, host), "keep_alive_seconds")
            .await
            .map_err(store_err)?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    /// Re-score a keep-alive member for its next wakeup.
    pub async fn reschedule_keepalive(&self, member: &str, at: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .zadd(keepalive_wakeup_key(), member, at)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Drop a keep-alive member from the schedule.
    pub async fn remove_keepalive(&self, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .zrem(keepalive_wakeup_key(), member)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Purge every keep-alive key (monitor start with `clear_buffers`).
    pub async fn clear_keepalive_buffers(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:provider:*", KEEPALIVE_PREFIX);
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(store_err)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        for key in keys {
            let _: i64 = conn.del(&key).await.map_err(store_err)?;
        }
        let _: i64 = conn.del(keepalive_wakeup_key()).await.map_err(store_err)?;
        Ok(())
    }

    /// Purge lock/occupancy state for the given models (strategy start
    /// with `clear_buffers`).
    pub async fn clear_model_buffers(&self, models: &[(String, Vec<String>)]) -> Result<()> {
        let mut conn = self.conn.clone();
        for (model, provider_ids) in models {
            for provider_id in provider_ids {
                let _: i64 = conn
                    .del(lock_key(model, provider_id))
                    .await
                    .map_err(store_err)?;
            }
            let _: i64 = conn.del(occupancy_key(model)).await.map_err(store_err)?;
            let _: i64 = conn.del(model_hosts_key(model)).await.map_err(store_err)?;
            let _: i64 = conn.del(last_host_key(model)).await.map_err(store_err)?;
        }
        Ok(())
    }
}
