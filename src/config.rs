use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_FILE_TIMEOUT_SECS: u64 = 120;

/// Application configuration
/// In debug builds: loads a .env file first, then reads the environment
#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite database holding collections and map records
    pub database_path: PathBuf,
    /// Parent directory for per-request staging areas (system temp dir if unset)
    pub staging_dir: Option<PathBuf>,
    /// Size of the bounded worker pool for per-file classify/normalize work
    pub max_workers: usize,
    /// Deadline for classifying and normalizing a single file
    pub file_timeout: Duration,
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            }
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    fn from_env() -> Self {
        let database_path = std::env::var("STATMAP_DATABASE_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_database_path);

        let staging_dir = std::env::var("STATMAP_STAGING_DIR")
            .ok()
            .map(PathBuf::from);

        let max_workers = std::env::var("STATMAP_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_WORKERS);

        let file_timeout = std::env::var("STATMAP_FILE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_FILE_TIMEOUT_SECS));

        info!(
            "Config: database {}, {} workers, {:?} per-file timeout",
            database_path.display(),
            max_workers,
            file_timeout
        );

        Self {
            database_path,
            staging_dir,
            max_workers,
            file_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            staging_dir: None,
            max_workers: DEFAULT_MAX_WORKERS,
            file_timeout: Duration::from_secs(DEFAULT_FILE_TIMEOUT_SECS),
        }
    }
}

/// ~/.statmap/statmaps.db, or the working directory when there is no home
fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".statmap")
        .join("statmaps.db")
}
