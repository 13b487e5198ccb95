use statmap_ingest::db::{Database, DbCollection};
use statmap_ingest::import::{IngestConfig, IngestService};
use statmap_ingest::library::{LibraryManager, SharedLibraryManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Temporary database plus a dedicated staging parent directory
pub struct TestLibrary {
    _temp_dir: TempDir,
    pub library: SharedLibraryManager,
    pub staging_dir: PathBuf,
}

impl TestLibrary {
    pub async fn new() -> Self {
        super::tracing_init();

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let staging_dir = temp_dir.path().join("staging");
        std::fs::create_dir_all(&staging_dir).expect("Failed to create staging dir");

        let database = Database::new(db_path.to_str().unwrap())
            .await
            .expect("Failed to create database");

        TestLibrary {
            _temp_dir: temp_dir,
            library: SharedLibraryManager::new(LibraryManager::new(database)),
            staging_dir,
        }
    }

    pub async fn collection(&self, private: bool) -> DbCollection {
        self.library
            .get()
            .create_collection("Test collection", "tester", private)
            .await
            .expect("Failed to create collection")
    }

    pub fn service(&self) -> IngestService {
        IngestService::new(
            Arc::new(self.library.clone()),
            IngestConfig {
                staging_dir: Some(self.staging_dir.clone()),
                max_workers: 3,
                file_timeout: Duration::from_secs(30),
            },
        )
    }

    /// Entries left in the staging parent; zero after every ingestion
    pub fn staging_leftovers(&self) -> usize {
        count_entries(&self.staging_dir)
    }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
