use crate::db::{Database, DbCollection, DbMapRecord, NewMapRecord};
use crate::library::collection_ref::{generate_private_token, CollectionRef};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Collection not found: {0}")]
    NotFound(String),
    #[error("Access to collection forbidden: {0}")]
    Forbidden(String),
}

/// Append-only sink for map records produced by the ingestion pipeline.
///
/// Implementations must tolerate concurrent calls from independent ingestion
/// requests; each call persists exactly one complete record or fails.
#[async_trait::async_trait]
pub trait MapRecordStore: Send + Sync {
    async fn create_map_record(&self, record: NewMapRecord) -> Result<DbMapRecord, LibraryError>;
}

/// The library manager for collection lookup and map record persistence
///
/// Handles:
/// - Collection creation and identifier resolution
/// - Map record persistence (the pipeline's record store)
/// - Query methods for listing a collection's records
#[derive(Debug, Clone)]
pub struct LibraryManager {
    database: Database,
}

impl LibraryManager {
    /// Create a new library manager
    pub fn new(database: Database) -> Self {
        LibraryManager { database }
    }

    /// Create a collection. Private collections get a fresh private token.
    pub async fn create_collection(
        &self,
        name: &str,
        owner: &str,
        private: bool,
    ) -> Result<DbCollection, LibraryError> {
        let private_token = private.then(generate_private_token);
        let mut collection = DbCollection::new(name, owner, private_token);
        collection.id = self.database.insert_collection(&collection).await?;

        info!(
            "Created collection {} '{}' for {} (private: {})",
            collection.id, collection.name, collection.owner, collection.private
        );
        Ok(collection)
    }

    /// Resolve a collection identifier.
    ///
    /// A private collection can only be reached through its token; asking for
    /// it by numeric id is forbidden.
    pub async fn resolve_collection(
        &self,
        collection_ref: &CollectionRef,
    ) -> Result<DbCollection, LibraryError> {
        match collection_ref {
            CollectionRef::NumericId(id) => {
                let collection = self
                    .database
                    .get_collection_by_id(*id)
                    .await?
                    .ok_or_else(|| LibraryError::NotFound(collection_ref.to_string()))?;
                if collection.private {
                    return Err(LibraryError::Forbidden(collection_ref.to_string()));
                }
                Ok(collection)
            }
            CollectionRef::PrivateToken(token) => self
                .database
                .get_collection_by_token(token)
                .await?
                .ok_or_else(|| LibraryError::NotFound(collection_ref.to_string())),
        }
    }

    /// Parse and resolve a raw identifier (numeric id or private token)
    pub async fn resolve_collection_str(&self, raw: &str) -> Result<DbCollection, LibraryError> {
        let collection_ref =
            CollectionRef::parse(raw).ok_or_else(|| LibraryError::NotFound(raw.to_string()))?;
        self.resolve_collection(&collection_ref).await
    }

    pub async fn get_map_record(&self, record_id: &str) -> Result<Option<DbMapRecord>, LibraryError> {
        Ok(self.database.get_map_record(record_id).await?)
    }

    pub async fn get_map_records_for_collection(
        &self,
        collection_id: i64,
    ) -> Result<Vec<DbMapRecord>, LibraryError> {
        Ok(self
            .database
            .get_map_records_for_collection(collection_id)
            .await?)
    }
}

#[async_trait::async_trait]
impl MapRecordStore for LibraryManager {
    async fn create_map_record(&self, record: NewMapRecord) -> Result<DbMapRecord, LibraryError> {
        let record = DbMapRecord::from_new(record);
        self.database.insert_map_record(&record).await?;
        Ok(record)
    }
}

/// Library manager shared between the ingestion service and its callers
#[derive(Debug, Clone)]
pub struct SharedLibraryManager {
    inner: Arc<LibraryManager>,
}

impl SharedLibraryManager {
    pub fn new(library_manager: LibraryManager) -> Self {
        SharedLibraryManager {
            inner: Arc::new(library_manager),
        }
    }

    pub fn get(&self) -> &LibraryManager {
        &self.inner
    }
}

#[async_trait::async_trait]
impl MapRecordStore for SharedLibraryManager {
    async fn create_map_record(&self, record: NewMapRecord) -> Result<DbMapRecord, LibraryError> {
        self.inner.create_map_record(record).await
    }
}
