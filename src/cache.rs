use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::{AppError, Result};
use crate::types::Snapshot;

/// Where each published snapshot is handed off for out-of-process readers.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write(&self, snapshot: &Snapshot, ttl: Duration) -> Result<()>;
}

/// Optional Redis hand-off of the latest snapshot for out-of-process readers.
///
/// Keys: `{prefix}:snapshot` holds the serialized snapshot, `{prefix}:stale`
/// holds `"1"` or `"0"`. Both expire so a dead pipeline never leaves a
/// fresh-looking entry behind.
#[derive(Clone)]
pub struct SnapshotCache {
    conn: ConnectionManager,
    snapshot_key: String,
    stale_key: String,
}

pub fn cache_keys(prefix: &str) -> (String, String) {
    (format!("{prefix}:snapshot"), format!("{prefix}:stale"))
}

impl SnapshotCache {
    /// Single attempt, bounded by `timeout`. Callers run without the cache on error.
    pub async fn connect(url: &str, prefix: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(AppError::Timeout(timeout.as_millis() as u64)),
        };
        info!("Connected to Redis snapshot cache");

        let (snapshot_key, stale_key) = cache_keys(prefix);
        Ok(Self { conn, snapshot_key, stale_key })
    }
}

#[async_trait]
impl SnapshotSink for SnapshotCache {
    async fn write(&self, snapshot: &Snapshot, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(snapshot)?;
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let stale = if snapshot.stale { "1" } else { "0" };

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SET").arg(&self.snapshot_key).arg(payload).arg("PX").arg(ttl_ms).ignore()
            .cmd("SET").arg(&self.stale_key).arg(stale).arg("PX").arg(ttl_ms).ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
