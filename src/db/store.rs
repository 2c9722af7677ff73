//! # Transcription Record Store
//!
//! SQLite-backed persistence for transcription results. Every save is a
//! plain insert inside its own implicit transaction; readers never observe a
//! partially written record. The schema is created idempotently on startup.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// One persisted transcription result.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TranscriptionRecord {
    pub id: i64,
    /// Storage-relative path of the audio bytes, unique per upload.
    pub audio_filepath: String,
    /// Client-supplied file name, preserved verbatim. Not unique.
    pub original_audio_filename: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

const SELECT_RECORDS: &str =
    "SELECT id, audio_filepath, original_audio_filename, text, created_at FROM transcriptions";

#[derive(Clone)]
pub struct TranscriptionStore {
    pool: SqlitePool,
}

impl TranscriptionStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let newly_created = !db_path.exists();

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        // WAL keeps readers live while a batch worker writes.
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        if newly_created {
            info!("Initialized new database: {}", db_path.display());
        } else {
            info!("Opened existing database: {}", db_path.display());
        }

        Self::init(pool).await
    }

    /// In-memory store for tests. A single connection, since every SQLite
    /// `:memory:` connection is its own database.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transcriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                audio_filepath TEXT NOT NULL,
                original_audio_filename TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transcriptions_filename
             ON transcriptions (original_audio_filename)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert one record. No update/upsert semantics; every call is an insert.
    pub async fn save(
        &self,
        audio_filepath: &str,
        original_audio_filename: &str,
        text: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO transcriptions (audio_filepath, original_audio_filename, text, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(audio_filepath)
        .bind(original_audio_filename)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All records, in insertion order.
    pub async fn list_all(&self) -> Result<Vec<TranscriptionRecord>, sqlx::Error> {
        sqlx::query_as::<_, TranscriptionRecord>(&format!("{SELECT_RECORDS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
    }

    /// Search records by original file name.
    ///
    /// Four-way matching policy:
    /// - full name, case sensitive: exact string equality
    /// - full name, case insensitive: equality after lowercasing both sides
    /// - partial, case sensitive: substring match preserving case (GLOB)
    /// - partial, case insensitive: substring match after lowercasing (LIKE)
    ///
    /// An empty `file_name` with the partial/insensitive policy matches every
    /// record.
    pub async fn search(
        &self,
        file_name: &str,
        match_full_name: bool,
        match_case: bool,
    ) -> Result<Vec<TranscriptionRecord>, sqlx::Error> {
        let (sql, needle) = match (match_full_name, match_case) {
            (true, true) => (
                format!("{SELECT_RECORDS} WHERE original_audio_filename = ?1 ORDER BY id"),
                file_name.to_string(),
            ),
            (true, false) => (
                format!("{SELECT_RECORDS} WHERE LOWER(original_audio_filename) = ?1 ORDER BY id"),
                file_name.to_lowercase(),
            ),
            (false, true) => (
                format!("{SELECT_RECORDS} WHERE original_audio_filename GLOB ?1 ORDER BY id"),
                format!("*{file_name}*"),
            ),
            (false, false) => (
                format!("{SELECT_RECORDS} WHERE LOWER(original_audio_filename) LIKE ?1 ORDER BY id"),
                format!("%{}%", file_name.to_lowercase()),
            ),
        };

        sqlx::query_as::<_, TranscriptionRecord>(&sql)
            .bind(needle)
            .fetch_all(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_save_and_list_round_trip() {
        let store = TranscriptionStore::open_in_memory().await.unwrap();

        store
            .save("audio_storage/uuid_a.mp3", "a.mp3", "hello world")
            .await
            .unwrap();

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].audio_filepath, "audio_storage/uuid_a.mp3");
        assert_eq!(records[0].original_audio_filename, "a.mp3");
        assert_eq!(records[0].text, "hello world");
        assert!(records[0].created_at <= Utc::now());
    }

    #[actix_web::test]
    async fn test_list_all_is_insertion_ordered() {
        let store = TranscriptionStore::open_in_memory().await.unwrap();

        for name in ["first.wav", "second.wav", "third.wav"] {
            store.save(&format!("audio_storage/{name}"), name, "").await.unwrap();
        }

        let records = store.list_all().await.unwrap();
        let names: Vec<_> = records
            .iter()
            .map(|r| r.original_audio_filename.as_str())
            .collect();
        assert_eq!(names, ["first.wav", "second.wav", "third.wav"]);
        assert!(records.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[actix_web::test]
    async fn test_empty_text_is_preserved() {
        let store = TranscriptionStore::open_in_memory().await.unwrap();
        store.save("audio_storage/uuid_s.wav", "s.wav", "").await.unwrap();

        let records = store.list_all().await.unwrap();
        assert_eq!(records[0].text, "");
    }

    async fn seeded_store() -> TranscriptionStore {
        let store = TranscriptionStore::open_in_memory().await.unwrap();
        for name in ["Meeting.mp3", "meeting.mp3", "notes_meeting.wav", "other.m4a"] {
            store
                .save(&format!("audio_storage/{name}"), name, "text")
                .await
                .unwrap();
        }
        store
    }

    #[actix_web::test]
    async fn test_search_full_name_case_sensitive() {
        let store = seeded_store().await;

        let records = store.search("Meeting.mp3", true, true).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_audio_filename, "Meeting.mp3");

        assert!(store.search("MEETING.MP3", true, true).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_search_full_name_case_insensitive() {
        let store = seeded_store().await;

        let records = store.search("MEETING.MP3", true, false).await.unwrap();
        let names: Vec<_> = records
            .iter()
            .map(|r| r.original_audio_filename.as_str())
            .collect();
        assert_eq!(names, ["Meeting.mp3", "meeting.mp3"]);
    }

    #[actix_web::test]
    async fn test_search_partial_case_sensitive() {
        let store = seeded_store().await;

        let records = store.search("meeting", false, true).await.unwrap();
        let names: Vec<_> = records
            .iter()
            .map(|r| r.original_audio_filename.as_str())
            .collect();
        assert_eq!(names, ["meeting.mp3", "notes_meeting.wav"]);
    }

    #[actix_web::test]
    async fn test_search_partial_case_insensitive() {
        let store = seeded_store().await;

        let records = store.search("meeting", false, false).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[actix_web::test]
    async fn test_search_empty_name_returns_all() {
        let store = seeded_store().await;

        let records = store.search("", false, false).await.unwrap();
        assert_eq!(records.len(), 4);
    }
}
