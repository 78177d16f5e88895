//! Optional SQLite snapshots of the queue and the ban list.

use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::sync::Arc;

use crate::{
    bans::Ban,
    error::AppResult,
    fanout::Subscription,
    model::{QueueEntry, QueueSnapshot},
    queue::QueueTopic,
};

const QUEUE: &str = "queue";
const BANS: &str = "bans";

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let pool = SqlitePoolOptions::new().max_connections(4).connect(url).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> AppResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (
                kind       TEXT PRIMARY KEY,
                body       TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    async fn put(&self, kind: &str, body: String) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO snapshots (kind, body, updated_at) VALUES (?,?,?)
             ON CONFLICT(kind) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(kind)
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, kind: &str) -> AppResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM snapshots WHERE kind = ?")
            .bind(kind)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(body,)| body))
    }

    pub async fn save_queue(&self, snap: &QueueSnapshot) -> AppResult<()> {
        self.put(QUEUE, serde_json::to_string(&snap.entries)?).await
    }

    pub async fn load_queue(&self) -> AppResult<Vec<QueueEntry>> {
        match self.get(QUEUE).await? {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_bans(&self, bans: &[Ban]) -> AppResult<()> {
        self.put(BANS, serde_json::to_string(bans)?).await
    }

    pub async fn load_bans(&self) -> AppResult<Vec<Ban>> {
        match self.get(BANS).await? {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Ok(Vec::new()),
        }
    }
}

/// Writes every queue snapshot the topic publishes. Snapshots that pile
/// up while a write is in flight are skipped, only the newest counts. If
/// the persister falls behind far enough to be cut off it resubscribes,
/// which hands it the current snapshot again.
pub async fn persist_queue(store: Store, topic: QueueTopic) {
    loop {
        if !drain(&store, topic.subscribe()).await {
            return;
        }
        tracing::warn!("queue persister fell behind, resubscribing");
    }
}

/// Returns true when the subscription overflowed.
async fn drain(store: &Store, mut sub: Subscription<Arc<QueueSnapshot>>) -> bool {
    let mut lost = false;
    while let Some(item) = sub.recv().await {
        let Ok(mut snap) = item else { return true };
        loop {
            match sub.try_recv() {
                Some(Ok(newer)) => snap = newer,
                Some(Err(_)) => lost = true,
                None => break,
            }
        }
        if let Err(e) = store.save_queue(&snap).await {
            tracing::error!(error = %e, version = snap.version, "queue snapshot not saved");
        }
        if lost {
            return true;
        }
    }
    false
}
