//! Recent-downloads history store (SQLite).
//!
//! Append-only, bounded to the most recent N records. The schema only ever
//! gains columns, and the new columns are nullable, so rows written by
//! older builds keep loading with defaulted fields.

use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use futures::stream::BoxStream;
use sqlx::{Row as _, SqlitePool};

/// One persisted download record.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub source_url: String,
    pub video_id: String,
    pub duration_secs: Option<i64>,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    limit: i64,
    enabled: bool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool, limit: usize, enabled: bool) -> Self {
        Self {
            pool,
            limit: limit as i64,
            enabled,
        }
    }

    /// Create the table and apply additive column upgrades.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                source_url TEXT NOT NULL,
                video_id TEXT NOT NULL,
                downloaded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Columns added after the original schema shipped. Re-running on an
        // up-to-date database reports a duplicate column, which is fine.
        for ddl in [
            "ALTER TABLE downloads ADD COLUMN album TEXT",
            "ALTER TABLE downloads ADD COLUMN duration_secs INTEGER",
        ] {
            if let Err(error) = sqlx::query(ddl).execute(&self.pool).await {
                if !error.to_string().contains("duplicate column") {
                    return Err(error.into());
                }
            }
        }
        Ok(())
    }

    /// Append one record, then trim the store to the configured bound.
    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO downloads
                (title, artist, album, source_url, video_id, duration_secs, downloaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.title)
        .bind(&record.artist)
        .bind(&record.album)
        .bind(&record.source_url)
        .bind(&record.video_id)
        .bind(record.duration_secs)
        .bind(record.downloaded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM downloads
             WHERE id NOT IN (SELECT id FROM downloads ORDER BY id DESC LIMIT ?)",
        )
        .bind(self.limit)
        .execute(&self.pool)
        .await?;

        tracing::debug!(title = %record.title, "history record appended");
        Ok(())
    }

    /// Lazy most-recent-first sequence of records. Calling again restarts
    /// it. Disabled stores always yield nothing.
    pub fn load(&self) -> BoxStream<'_, Result<HistoryRecord>> {
        if !self.enabled {
            return futures::stream::empty().boxed();
        }
        sqlx::query(
            "SELECT title, artist, album, source_url, video_id, duration_secs, downloaded_at
             FROM downloads ORDER BY id DESC",
        )
        .fetch(&self.pool)
        .map(|row| {
            let row = row?;
            Ok(row_to_record(&row))
        })
        .boxed()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> HistoryRecord {
    let downloaded_at = row
        .try_get::<String, _>("downloaded_at")
        .ok()
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    HistoryRecord {
        title: row.try_get("title").unwrap_or_default(),
        artist: row.try_get("artist").unwrap_or_default(),
        // Nullable columns default so pre-upgrade rows still load.
        album: row.try_get::<Option<String>, _>("album").ok().flatten(),
        source_url: row.try_get("source_url").unwrap_or_default(),
        video_id: row.try_get("video_id").unwrap_or_default(),
        duration_secs: row
            .try_get::<Option<i64>, _>("duration_secs")
            .ok()
            .flatten(),
        downloaded_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect")
    }

    async fn setup_store(limit: usize, enabled: bool) -> HistoryStore {
        let store = HistoryStore::new(memory_pool().await, limit, enabled);
        store.init().await.expect("schema should initialize");
        store
    }

    fn record(n: i64) -> HistoryRecord {
        HistoryRecord {
            title: format!("Track {n}"),
            artist: "Artist".to_string(),
            album: Some("Album".to_string()),
            source_url: format!("https://music.youtube.com/watch?v=vid{n:08}"),
            video_id: format!("vid{n:08}"),
            duration_secs: Some(180 + n),
            downloaded_at: Utc::now(),
        }
    }

    async fn collect(store: &HistoryStore) -> Vec<HistoryRecord> {
        store
            .load()
            .map(|item| item.expect("row should load"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn append_then_load_round_trips_most_recent_first() {
        let store = setup_store(10, true).await;
        let first = record(1);
        let second = record(2);
        store.append(&first).await.expect("append");
        store.append(&second).await.expect("append");

        let loaded = collect(&store).await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].title, second.title);
        assert_eq!(loaded[0].video_id, second.video_id);
        assert_eq!(loaded[1].title, first.title);
    }

    #[tokio::test]
    async fn store_never_exceeds_its_bound() {
        let store = setup_store(10, true).await;
        for n in 1..=15 {
            store.append(&record(n)).await.expect("append");
        }

        let loaded = collect(&store).await;
        assert_eq!(loaded.len(), 10);
        // The five oldest were trimmed; the newest leads.
        assert_eq!(loaded[0].title, "Track 15");
        assert_eq!(loaded[9].title, "Track 6");
    }

    #[tokio::test]
    async fn legacy_rows_load_with_defaulted_fields() {
        let pool = memory_pool().await;
        // A database created before the album/duration columns existed.
        sqlx::query(
            r#"
            CREATE TABLE downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                source_url TEXT NOT NULL,
                video_id TEXT NOT NULL,
                downloaded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("legacy schema");
        sqlx::query(
            "INSERT INTO downloads (title, artist, source_url, video_id, downloaded_at)
             VALUES ('Old Track', 'Old Artist', 'https://x', 'oldvid00001', ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .expect("legacy row");

        let store = HistoryStore::new(pool, 10, true);
        store.init().await.expect("upgrade should apply");

        let loaded = collect(&store).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "Old Track");
        assert_eq!(loaded[0].album, None);
        assert_eq!(loaded[0].duration_secs, None);

        // And the upgraded schema accepts new-format rows.
        store.append(&record(2)).await.expect("append after upgrade");
        assert_eq!(collect(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn disabled_store_appends_nothing_and_loads_nothing() {
        let store = setup_store(10, false).await;
        store.append(&record(1)).await.expect("no-op append");
        assert!(collect(&store).await.is_empty());
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = setup_store(10, true).await;
        store.init().await.expect("second init should not fail");
        store.append(&record(1)).await.expect("append");
        assert_eq!(collect(&store).await.len(), 1);
    }
}
