use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::db::models::*;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Collections table (owned outside the ingestion pipeline)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                private BOOLEAN NOT NULL DEFAULT FALSE,
                private_token TEXT UNIQUE,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Map records table (append-only from the pipeline)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS map_records (
                id TEXT PRIMARY KEY,
                collection_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                map_type TEXT NOT NULL,
                content BLOB NOT NULL,
                content_sha256 TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (collection_id) REFERENCES collections (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_map_records_collection ON map_records (collection_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new collection, returning its database id
    pub async fn insert_collection(&self, collection: &DbCollection) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO collections (
                name, owner, private, private_token, created_at
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&collection.name)
        .bind(&collection.owner)
        .bind(collection.private)
        .bind(&collection.private_token)
        .bind(collection.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_collection_by_id(
        &self,
        collection_id: i64,
    ) -> Result<Option<DbCollection>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
            .bind(collection_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| collection_from_row(&row)).transpose()
    }

    pub async fn get_collection_by_token(
        &self,
        private_token: &str,
    ) -> Result<Option<DbCollection>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM collections WHERE private_token = ?")
            .bind(private_token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| collection_from_row(&row)).transpose()
    }

    /// Insert a map record with its content in a single statement
    pub async fn insert_map_record(&self, record: &DbMapRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO map_records (
                id, collection_id, name, description, map_type,
                content, content_sha256, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.collection_id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(record.map_type)
        .bind(&record.content)
        .bind(&record.content_sha256)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_map_record(&self, record_id: &str) -> Result<Option<DbMapRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM map_records WHERE id = ?")
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| map_record_from_row(&row)).transpose()
    }

    /// Get all map records of a collection in insertion order
    pub async fn get_map_records_for_collection(
        &self,
        collection_id: i64,
    ) -> Result<Vec<DbMapRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM map_records WHERE collection_id = ? ORDER BY rowid",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_record_from_row).collect()
    }
}

fn collection_from_row(row: &SqliteRow) -> Result<DbCollection, sqlx::Error> {
    Ok(DbCollection {
        id: row.get("id"),
        name: row.get("name"),
        owner: row.get("owner"),
        private: row.get("private"),
        private_token: row.get("private_token"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn map_record_from_row(row: &SqliteRow) -> Result<DbMapRecord, sqlx::Error> {
    Ok(DbMapRecord {
        id: row.get("id"),
        collection_id: row.get("collection_id"),
        name: row.get("name"),
        description: row.get("description"),
        map_type: row.get("map_type"),
        content: row.get("content"),
        content_sha256: row.get("content_sha256"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
