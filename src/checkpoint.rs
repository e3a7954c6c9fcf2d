//! Per-thread snapshots of graph state, written after every node.
//!
//! Two backends are provided: [`MemorySaver`] for a single process and
//! [`RedisSaver`], which survives restarts and can be inspected from
//! redis-cli or the Redis-stack UI.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::state::GraphState;

pub const DEFAULT_PREFIX: &str = "ledger-agent:checkpoint";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub step: u64,
    /// Node that produced this state.
    pub node: String,
    /// Node that runs next, or `END`.
    pub next: String,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn state_as<S: GraphState>(&self) -> Result<S> {
        Ok(serde_json::from_value(self.state.clone())?)
    }
}

#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Checkpoints for a thread, newest first.
    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>>;

    async fn threads(&self) -> Result<Vec<String>>;

    /// Remove every checkpoint of a thread, returning how many were removed.
    async fn delete_thread(&self, thread_id: &str) -> Result<u64>;
}

#[derive(Default)]
pub struct MemorySaver {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemorySaver {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut threads = self.threads.write().await;
        let entries = threads.entry(checkpoint.thread_id.clone()).or_default();
        entries.retain(|c| c.step != checkpoint.step);
        entries.push(checkpoint.clone());
        entries.sort_by_key(|c| c.step);
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|e| e.last().cloned()))
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let threads = self.threads.read().await;
        let Some(entries) = threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn threads(&self) -> Result<Vec<String>> {
        let threads = self.threads.read().await;
        let mut ids: Vec<String> = threads.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<u64> {
        let mut threads = self.threads.write().await;
        Ok(threads.remove(thread_id).map(|e| e.len() as u64).unwrap_or(0))
    }
}

/// Checkpoints stored as JSON strings in Redis.
///
/// Layout under `prefix`:
/// - `{prefix}:{thread}:{step:010}` checkpoint JSON (optional TTL)
/// - `{prefix}:{thread}:index` sorted set of steps (TTL refreshed on every put)
/// - `{prefix}:threads` set of thread ids
/// Index entries fetched per round trip when walking a thread backwards.
const INDEX_PAGE: usize = 16;

#[derive(Clone)]
pub struct RedisSaver {
    conn: redis::aio::ConnectionManager,
    prefix: String,
    ttl_secs: Option<u64>,
}

impl RedisSaver {
    pub fn new(conn: redis::aio::ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: Option<u64>) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix))
    }

    fn checkpoint_key(&self, thread_id: &str, step: u64) -> String {
        format!("{}:{}:{:010}", self.prefix, thread_id, step)
    }

    fn index_key(&self, thread_id: &str) -> String {
        format!("{}:{}:index", self.prefix, thread_id)
    }

    fn threads_key(&self) -> String {
        format!("{}:threads", self.prefix)
    }

    /// Fetch the given steps, dropping index entries whose key has expired.
    async fn load_steps(&self, thread_id: &str, steps: &[u64]) -> Result<Vec<Checkpoint>> {
        if steps.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MGET");
        for step in steps {
            cmd.arg(self.checkpoint_key(thread_id, *step));
        }
        let raw: Vec<Option<String>> = cmd.query_async(&mut conn).await?;

        let mut out = Vec::with_capacity(raw.len());
        let mut expired = Vec::new();
        for (step, value) in steps.iter().zip(raw) {
            match value {
                Some(json) => out.push(serde_json::from_str(&json)?),
                None => expired.push(*step),
            }
        }
        if !expired.is_empty() {
            tracing::debug!(thread_id, ?expired, "Pruning expired checkpoints from index");
            let _: () = redis::cmd("ZREM")
                .arg(self.index_key(thread_id))
                .arg(&expired)
                .query_async(&mut conn)
                .await?;
        }
        Ok(out)
    }

    /// Walk the index newest first, one page at a time, until `limit` live
    /// checkpoints are found or the index is exhausted.
    async fn newest(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let mut conn = self.conn.clone();
        let wanted = limit.unwrap_or(usize::MAX);
        let page: isize = if limit.is_some() { INDEX_PAGE as isize } else { -1 };
        let mut out: Vec<Checkpoint> = Vec::new();
        // Expired entries are removed while walking, so the offset only
        // advances past live ones.
        let mut offset: isize = 0;

        while out.len() < wanted {
            let stop = if page < 0 { -1 } else { offset + page - 1 };
            let steps: Vec<u64> = redis::cmd("ZREVRANGE")
                .arg(self.index_key(thread_id))
                .arg(offset)
                .arg(stop)
                .query_async(&mut conn)
                .await?;
            if steps.is_empty() {
                break;
            }
            let loaded = self.load_steps(thread_id, &steps).await?;
            offset += loaded.len() as isize;
            let exhausted = page < 0 || (steps.len() as isize) < page;
            out.extend(loaded);
            if exhausted {
                break;
            }
        }
        out.truncate(wanted);
        Ok(out)
    }
}

#[async_trait]
impl Checkpointer for RedisSaver {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(checkpoint)?;
        let key = self.checkpoint_key(&checkpoint.thread_id, checkpoint.step);
        let index = self.index_key(&checkpoint.thread_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        match self.ttl_secs {
            Some(ttl) => pipe.cmd("SET").arg(&key).arg(&json).arg("EX").arg(ttl).ignore(),
            None => pipe.cmd("SET").arg(&key).arg(&json).ignore(),
        };
        pipe.cmd("ZADD")
            .arg(&index)
            .arg(checkpoint.step)
            .arg(checkpoint.step)
            .ignore();
        // The index outlives every step it lists.
        if let Some(ttl) = self.ttl_secs {
            pipe.cmd("EXPIRE").arg(&index).arg(ttl).ignore();
        }
        pipe.cmd("SADD")
            .arg(self.threads_key())
            .arg(&checkpoint.thread_id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            step = checkpoint.step,
            node = %checkpoint.node,
            "Stored checkpoint"
        );
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.newest(thread_id, Some(1)).await?.into_iter().next())
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        self.newest(thread_id, limit).await
    }

    /// Thread ids with a live index. Ids whose index has expired are removed
    /// from the thread set.
    async fn threads(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.threads_key())
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(ids);
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.cmd("EXISTS").arg(self.index_key(id));
        }
        let exists: Vec<bool> = pipe.query_async(&mut conn).await?;

        let mut live = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();
        for (id, exists) in ids.into_iter().zip(exists) {
            if exists {
                live.push(id);
            } else {
                stale.push(id);
            }
        }
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "Pruning expired threads");
            let _: () = redis::cmd("SREM")
                .arg(self.threads_key())
                .arg(&stale)
                .query_async(&mut conn)
                .await?;
        }
        live.sort();
        Ok(live)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let steps: Vec<u64> = redis::cmd("ZRANGE")
            .arg(self.index_key(thread_id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if !steps.is_empty() {
            let mut del = redis::cmd("DEL");
            for step in &steps {
                del.arg(self.checkpoint_key(thread_id, *step));
            }
            pipe.add_command(del);
        }
        pipe.cmd("DEL").arg(self.index_key(thread_id)).ignore();
        pipe.cmd("SREM").arg(self.threads_key()).arg(thread_id).ignore();
        let removed: Vec<u64> = pipe.query_async(&mut conn).await?;

        // Only keys that still existed count, expired steps do not.
        Ok(removed.into_iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(thread: &str, step: u64) -> Checkpoint {
        Checkpoint {
            thread_id: thread.to_string(),
            step,
            node: format!("node-{}", step),
            next: "__end__".to_string(),
            state: serde_json::json!({"step": step}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_saver_lists_newest_first() {
        let saver = MemorySaver::new();
        for step in 0..3 {
            saver.put(&checkpoint("t1", step)).await.unwrap();
        }
        let steps: Vec<u64> = saver
            .list("t1", Some(2))
            .await
            .unwrap()
            .iter()
            .map(|c| c.step)
            .collect();
        assert_eq!(steps, [2, 1]);
        assert_eq!(saver.latest("t1").await.unwrap().unwrap().step, 2);
    }

    #[tokio::test]
    async fn memory_saver_overwrites_same_step() {
        let saver = MemorySaver::new();
        saver.put(&checkpoint("t1", 0)).await.unwrap();
        let mut replaced = checkpoint("t1", 0);
        replaced.node = "other".into();
        saver.put(&replaced).await.unwrap();
        let all = saver.list("t1", None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].node, "other");
    }

    #[tokio::test]
    async fn memory_saver_delete_thread() {
        let saver = MemorySaver::new();
        saver.put(&checkpoint("a", 0)).await.unwrap();
        saver.put(&checkpoint("a", 1)).await.unwrap();
        saver.put(&checkpoint("b", 0)).await.unwrap();
        assert_eq!(saver.threads().await.unwrap(), ["a", "b"]);
        assert_eq!(saver.delete_thread("a").await.unwrap(), 2);
        assert!(saver.latest("a").await.unwrap().is_none());
        assert_eq!(saver.delete_thread("missing").await.unwrap(), 0);
    }
}
