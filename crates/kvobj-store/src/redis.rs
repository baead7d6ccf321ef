//! [`StoreClient`] over a Redis server.
//!
//! Hash, list and sorted-set primitives map one-to-one onto Redis commands.
//! Extremal pops use `ZPOPMIN`/`ZPOPMAX`, which the server executes
//! atomically. Blocking pops run `BLPOP` on a dedicated connection inside a
//! spawned task so they never stall the shared multiplexed connection.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue, RedisError};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreClient;
use crate::types::{Extremity, KeyKind, ScanCursor, ScanPage, ScoredMember, Wait};

/// Connection settings for [`RedisStore`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

fn map_error(err: RedisError, key: &str, expected: Option<KeyKind>) -> StoreError {
    if err.code() == Some("WRONGTYPE") {
        if let Some(expected) = expected {
            return StoreError::TypeMismatch {
                key: key.to_string(),
                expected,
            };
        }
    }
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

/// Redis-backed store client.
///
/// Cloning is cheap; clones share the managed connection.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a managed connection to the server named by `config`.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| map_error(e, "", None))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| map_error(e, "", None))?;
        info!(url = %config.url, "connected to redis");
        Ok(Self { client, conn })
    }

    async fn run<T: FromRedisValue>(&self, cmd: &Cmd, key: &str, kind: Option<KeyKind>) -> StoreResult<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| map_error(e, key, kind))
    }

    async fn hash<T: FromRedisValue>(&self, cmd: &Cmd, key: &str) -> StoreResult<T> {
        self.run(cmd, key, Some(KeyKind::Hash)).await
    }

    async fn list<T: FromRedisValue>(&self, cmd: &Cmd, key: &str) -> StoreResult<T> {
        self.run(cmd, key, Some(KeyKind::List)).await
    }

    async fn zset<T: FromRedisValue>(&self, cmd: &Cmd, key: &str) -> StoreResult<T> {
        self.run(cmd, key, Some(KeyKind::SortedSet)).await
    }
}

/// Longest bounded `BLPOP` timeout sent as-is. Anything longer waits forever.
const MAX_BLPOP_SECS: f64 = 1e9;

/// Pause between `CLIENT UNBLOCK` attempts after the caller has gone away.
const UNBLOCK_RETRY: Duration = Duration::from_millis(50);

/// `BLPOP` on its own connection. If the waiting caller goes away first, the
/// server-side wait is cut short with `CLIENT UNBLOCK` and the reply, if any
/// element was already taken, is still collected so it can be put back.
async fn blpop_dedicated(
    client: &Client,
    control: &ConnectionManager,
    key: &str,
    timeout_secs: f64,
    waiter: &mut oneshot::Sender<StoreResult<Option<Bytes>>>,
) -> redis::RedisResult<Option<Bytes>> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let id: i64 = redis::cmd("CLIENT").arg("ID").query_async(&mut conn).await?;
    if waiter.is_closed() {
        return Ok(None);
    }

    let blpop = redis::cmd("BLPOP").arg(key).arg(timeout_secs).clone();
    let pop = async move {
        let reply: Option<(String, Vec<u8>)> = blpop.query_async(&mut conn).await?;
        Ok::<_, RedisError>(reply.map(|(_, v)| Bytes::from(v)))
    };
    tokio::pin!(pop);

    tokio::select! {
        biased;
        reply = &mut pop => reply,
        _ = waiter.closed() => {
            let control = control.clone();
            drain_after_cancel(pop.as_mut(), move || {
                let mut control = control.clone();
                async move {
                    let released: i64 = redis::cmd("CLIENT")
                        .arg("UNBLOCK")
                        .arg(id)
                        .query_async(&mut control)
                        .await?;
                    Ok::<i64, RedisError>(released)
                }
            })
            .await
        }
    }
}

/// Drive `pop` to completion, calling `unblock` until it does.
///
/// The unblock travels on another connection and can reach the server before
/// the blocking command it targets, in which case it releases nothing.
async fn drain_after_cancel<T, P, U, F>(mut pop: Pin<&mut P>, mut unblock: U) -> T
where
    P: Future<Output = T>,
    U: FnMut() -> F,
    F: Future<Output = redis::RedisResult<i64>>,
{
    let mut retry = tokio::time::interval(UNBLOCK_RETRY);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            reply = pop.as_mut() => return reply,
            _ = retry.tick() => match unblock().await {
                Ok(released) => debug!(released, "sent unblock for cancelled pop"),
                Err(e) => debug!(error = %e, "unblock for cancelled pop failed"),
            },
        }
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    async fn key_kind(&self, key: &str) -> StoreResult<Option<KeyKind>> {
        let kind: String = self.run(redis::cmd("TYPE").arg(key), key, None).await?;
        match kind.as_str() {
            "none" => Ok(None),
            "hash" => Ok(Some(KeyKind::Hash)),
            "list" => Ok(Some(KeyKind::List)),
            "zset" => Ok(Some(KeyKind::SortedSet)),
            other => Err(StoreError::Backend(format!(
                "key {key:?} holds unsupported type {other}"
            ))),
        }
    }

    async fn delete_key(&self, key: &str) -> StoreResult<bool> {
        let removed: i64 = self.run(redis::cmd("DEL").arg(key), key, None).await?;
        Ok(removed > 0)
    }

    async fn get_field(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.hash(redis::cmd("HGET").arg(key).arg(field), key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn get_fields(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Bytes>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field.as_str());
        }
        let values: Vec<Option<Vec<u8>>> = self.hash(&cmd, key).await?;
        Ok(values.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn set_field(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool> {
        let added: i64 = self
            .hash(redis::cmd("HSET").arg(key).arg(field).arg(value.as_ref()), key)
            .await?;
        Ok(added == 1)
    }

    async fn set_field_if_absent(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool> {
        let added: i64 = self
            .hash(redis::cmd("HSETNX").arg(key).arg(field).arg(value.as_ref()), key)
            .await?;
        Ok(added == 1)
    }

    async fn delete_field(&self, key: &str, field: &str) -> StoreResult<bool> {
        let removed: i64 = self.hash(redis::cmd("HDEL").arg(key).arg(field), key).await?;
        Ok(removed == 1)
    }

    async fn scan_fields(&self, key: &str, cursor: ScanCursor, count: usize) -> StoreResult<ScanPage> {
        let position: u64 = match &cursor {
            ScanCursor::Start => 0,
            ScanCursor::Resume(c) => c
                .parse()
                .map_err(|_| StoreError::Backend(format!("invalid scan cursor {c:?}")))?,
        };
        let (next, entries): (u64, Vec<(String, Vec<u8>)>) = self
            .hash(
                redis::cmd("HSCAN")
                    .arg(key)
                    .arg(position)
                    .arg("COUNT")
                    .arg(count.max(1)),
                key,
            )
            .await?;
        Ok(ScanPage {
            entries: entries
                .into_iter()
                .map(|(f, v)| (f, Bytes::from(v)))
                .collect(),
            next: (next != 0).then(|| ScanCursor::Resume(next.to_string())),
        })
    }

    async fn field_count(&self, key: &str) -> StoreResult<usize> {
        self.hash(redis::cmd("HLEN").arg(key), key).await
    }

    async fn push_tail(&self, key: &str, value: Bytes) -> StoreResult<usize> {
        self.list(redis::cmd("RPUSH").arg(key).arg(value.as_ref()), key).await
    }

    async fn push_head(&self, key: &str, value: Bytes) -> StoreResult<usize> {
        self.list(redis::cmd("LPUSH").arg(key).arg(value.as_ref()), key).await
    }

    async fn pop_head(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.list(redis::cmd("LPOP").arg(key), key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn blocking_pop_head(&self, key: &str, wait: Wait) -> StoreResult<Option<Bytes>> {
        let timeout_secs = match wait {
            Wait::NoWait => return self.pop_head(key).await,
            // BLPOP treats 0 as "forever", so keep bounded waits above it.
            Wait::For(d) if d.as_secs_f64() > MAX_BLPOP_SECS => 0.0,
            Wait::For(d) => d.as_secs_f64().max(0.001),
            Wait::Forever => 0.0,
        };

        let (mut tx, rx) = oneshot::channel();
        let client = self.client.clone();
        let mut control = self.conn.clone();
        let key_owned = key.to_string();
        tokio::spawn(async move {
            let result = blpop_dedicated(&client, &control, &key_owned, timeout_secs, &mut tx)
                .await
                .map_err(|e| map_error(e, &key_owned, Some(KeyKind::List)));
            if let Err(Ok(Some(value))) = tx.send(result) {
                // The caller was cancelled after the element left the list.
                let pushed: redis::RedisResult<i64> = redis::cmd("LPUSH")
                    .arg(key_owned.as_str())
                    .arg(value.as_ref())
                    .query_async(&mut control)
                    .await;
                match pushed {
                    Ok(_) => debug!(key = %key_owned, "returned element from cancelled pop"),
                    Err(e) => warn!(key = %key_owned, error = %e, "failed to return element from cancelled pop"),
                }
            }
        });

        match rx.await {
            Ok(result) => {
                if matches!(result, Ok(None)) {
                    debug!(key, "blocking pop timed out");
                }
                result
            }
            Err(_) => Err(StoreError::Unavailable("blocking pop task ended without a reply".into())),
        }
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        self.list(redis::cmd("LLEN").arg(key), key).await
    }

    async fn add_member(&self, key: &str, score: f64, member: Bytes) -> StoreResult<bool> {
        if score.is_nan() {
            return Err(StoreError::InvalidScore(score));
        }
        let added: i64 = self
            .zset(redis::cmd("ZADD").arg(key).arg(score).arg(member.as_ref()), key)
            .await?;
        Ok(added == 1)
    }

    async fn peek_extremal(&self, key: &str, end: Extremity) -> StoreResult<Option<ScoredMember>> {
        let name = match end {
            Extremity::Min => "ZRANGE",
            Extremity::Max => "ZREVRANGE",
        };
        let members: Vec<(Vec<u8>, f64)> = self
            .zset(redis::cmd(name).arg(key).arg(0).arg(0).arg("WITHSCORES"), key)
            .await?;
        Ok(members.into_iter().next().map(|(member, score)| ScoredMember {
            member: Bytes::from(member),
            score,
        }))
    }

    async fn remove_member(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        let removed: i64 = self.zset(redis::cmd("ZREM").arg(key).arg(member), key).await?;
        Ok(removed == 1)
    }

    async fn member_score(&self, key: &str, member: &[u8]) -> StoreResult<Option<f64>> {
        self.zset(redis::cmd("ZSCORE").arg(key).arg(member), key).await
    }

    async fn member_rank(&self, key: &str, member: &[u8], end: Extremity) -> StoreResult<Option<usize>> {
        let name = match end {
            Extremity::Min => "ZRANK",
            Extremity::Max => "ZREVRANK",
        };
        self.zset(redis::cmd(name).arg(key).arg(member), key).await
    }

    async fn member_count(&self, key: &str) -> StoreResult<usize> {
        self.zset(redis::cmd("ZCARD").arg(key), key).await
    }

    async fn pop_extremal(&self, key: &str, end: Extremity) -> StoreResult<Option<ScoredMember>> {
        let name = match end {
            Extremity::Min => "ZPOPMIN",
            Extremity::Max => "ZPOPMAX",
        };
        let popped: Vec<(Vec<u8>, f64)> = self.zset(redis::cmd(name).arg(key).arg(1), key).await?;
        Ok(popped.into_iter().next().map(|(member, score)| ScoredMember {
            member: Bytes::from(member),
            score,
        }))
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn default_config_points_at_localhost() {
        assert_eq!(RedisConfig::default().url, "redis://127.0.0.1:6379");
    }

    #[tokio::test]
    async fn cancelled_pop_keeps_unblocking_until_it_returns() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (release, released) = oneshot::channel::<()>();
        let mut release = Some(release);
        let pop = async move {
            let _ = released.await;
            Ok::<_, RedisError>(Some(Bytes::from_static(b"taken")))
        };
        tokio::pin!(pop);

        let counter = Arc::clone(&attempts);
        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            drain_after_cancel(pop.as_mut(), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                // Early attempts land before the server-side wait begins,
                // and one fails outright.
                let outcome: redis::RedisResult<i64> = match n {
                    1 => Err(RedisError::from(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "reset",
                    ))),
                    2 => Ok(0),
                    _ => {
                        if let Some(tx) = release.take() {
                            let _ = tx.send(());
                        }
                        Ok(1)
                    }
                };
                async move { outcome }
            }),
        )
        .await
        .expect("drain finishes once the pop is released")
        .unwrap();

        assert_eq!(reply, Some(Bytes::from_static(b"taken")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn finished_pop_needs_no_unblock() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let pop = async { Ok::<_, RedisError>(None::<Bytes>) };
        tokio::pin!(pop);
        let counter = Arc::clone(&attempts);
        let reply = drain_after_cancel(pop.as_mut(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<i64, RedisError>(0) }
        })
        .await
        .unwrap();
        assert_eq!(reply, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn io_errors_map_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = RedisError::from(io);
        assert!(matches!(map_error(err, "k", None), StoreError::Unavailable(_)));
    }
}
