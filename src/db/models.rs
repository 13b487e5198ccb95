use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Type;
use uuid::Uuid;

// String constants for stored map types (keep in sync with as_str())
const MAP_TYPE_T: &str = "t";
const MAP_TYPE_F: &str = "f";
const MAP_TYPE_OTHER: &str = "other";

/// Statistical map type of an ingested volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum MapType {
    T,     // T-statistic map (spmT_*)
    F,     // F-statistic map (spmF_*)
    Other, // Anything else
}

impl MapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapType::T => MAP_TYPE_T,
            MapType::F => MAP_TYPE_F,
            MapType::Other => MAP_TYPE_OTHER,
        }
    }
}

/// A collection of statistical maps owned by one user
///
/// Collections are created outside the ingestion pipeline. The pipeline only
/// reads a collection's identity and appends map records to it.
///
/// Private collections are addressed by an 8-letter uppercase token instead of
/// their numeric id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbCollection {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub private: bool,
    pub private_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One ingested statistical map
///
/// `content` always holds the canonical gzip-compressed single-file volume.
/// The row is written in one INSERT, so a record never exists without content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbMapRecord {
    pub id: String,
    pub collection_id: i64,
    /// Display name derived from the upload's relative path (not unique)
    pub name: String,
    /// Free-text description copied from the volume header
    pub description: String,
    pub map_type: MapType,
    #[serde(skip)]
    pub content: Vec<u8>,
    /// Hex SHA-256 of `content`
    pub content_sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Fields the ingestion pipeline supplies for a new map record
#[derive(Debug, Clone)]
pub struct NewMapRecord {
    pub collection_id: i64,
    pub name: String,
    pub description: String,
    pub map_type: MapType,
    pub content: Vec<u8>,
}

impl DbCollection {
    pub fn new(name: &str, owner: &str, private_token: Option<String>) -> Self {
        DbCollection {
            id: 0, // assigned by the database on insert
            name: name.to_string(),
            owner: owner.to_string(),
            private: private_token.is_some(),
            private_token,
            created_at: Utc::now(),
        }
    }
}

impl DbMapRecord {
    pub fn from_new(record: NewMapRecord) -> Self {
        let content_sha256 = hex::encode(Sha256::digest(&record.content));
        DbMapRecord {
            id: Uuid::new_v4().to_string(),
            collection_id: record.collection_id,
            name: record.name,
            description: record.description,
            map_type: record.map_type,
            content: record.content,
            content_sha256,
            created_at: Utc::now(),
        }
    }
}
