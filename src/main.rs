use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use walkdir::WalkDir;

use statmap_ingest::db::Database;
use statmap_ingest::import::{IngestConfig, IngestService, UploadSource, UploadedFile, UploadedPart};
use statmap_ingest::library::{LibraryManager, SharedLibraryManager};
use statmap_ingest::Config;

enum Command {
    CreateCollection {
        name: String,
        owner: String,
        private: bool,
    },
    Ingest {
        collection: String,
        path: PathBuf,
    },
    List {
        collection: String,
    },
}

fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            error!("{}", message);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    let config = Config::load();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(command, config)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let rest = args.get(2..).unwrap_or_default();
    match args.get(1).map(String::as_str) {
        Some("create-collection") => {
            let mut name: Option<String> = None;
            let mut owner: Option<String> = None;
            let mut private = false;

            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--owner" => {
                        owner = Some(
                            rest.get(i + 1)
                                .cloned()
                                .ok_or("--owner requires a user name")?,
                        );
                        i += 2;
                    }
                    "--private" => {
                        private = true;
                        i += 1;
                    }
                    arg if name.is_none() && !arg.starts_with("--") => {
                        name = Some(arg.to_string());
                        i += 1;
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
            }

            Ok(Command::CreateCollection {
                name: name.ok_or("create-collection requires a name")?,
                owner: owner.ok_or("create-collection requires --owner")?,
                private,
            })
        }
        Some("ingest") => match rest {
            [collection, path] => Ok(Command::Ingest {
                collection: collection.clone(),
                path: PathBuf::from(path),
            }),
            _ => Err("ingest requires a collection and a path".to_string()),
        },
        Some("list") => match rest {
            [collection] => Ok(Command::List {
                collection: collection.clone(),
            }),
            _ => Err("list requires a collection".to_string()),
        },
        Some(other) => Err(format!("Unknown command: {}", other)),
        None => Err("No command given".to_string()),
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} create-collection <name> --owner <user> [--private]", program);
    eprintln!("  {} ingest <collection-id-or-token> <archive-or-directory>", program);
    eprintln!("  {} list <collection-id-or-token>", program);
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  STATMAP_DATABASE_PATH, STATMAP_STAGING_DIR, STATMAP_MAX_WORKERS,");
    eprintln!("  STATMAP_FILE_TIMEOUT_SECS, RUST_LOG");
}

async fn run(command: Command, config: Config) -> Result<(), String> {
    let library_manager = open_library(&config).await?;

    match command {
        Command::CreateCollection {
            name,
            owner,
            private,
        } => {
            let collection = library_manager
                .get()
                .create_collection(&name, &owner, private)
                .await
                .map_err(|e| e.to_string())?;
            match collection.private_token {
                Some(token) => println!("{} (private token: {})", collection.id, token),
                None => println!("{}", collection.id),
            }
        }
        Command::Ingest { collection, path } => {
            let collection = library_manager
                .get()
                .resolve_collection_str(&collection)
                .await
                .map_err(|e| e.to_string())?;

            let source = tokio::task::spawn_blocking(move || read_upload(&path))
                .await
                .map_err(|e| format!("Reading upload failed: {}", e))??;

            let service = IngestService::new(
                Arc::new(library_manager.clone()),
                IngestConfig::from(&config),
            );
            let report = service
                .ingest(&collection, source)
                .await
                .map_err(|e| e.to_string())?;

            let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        Command::List { collection } => {
            let collection = library_manager
                .get()
                .resolve_collection_str(&collection)
                .await
                .map_err(|e| e.to_string())?;
            let records = library_manager
                .get()
                .get_map_records_for_collection(collection.id)
                .await
                .map_err(|e| e.to_string())?;

            for record in records {
                println!("{}\t{}\t{}", record.id, record.map_type.as_str(), record.name);
            }
        }
    }
    Ok(())
}

async fn open_library(config: &Config) -> Result<SharedLibraryManager, String> {
    if let Some(parent) = config.database_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    let database_path = config
        .database_path
        .to_str()
        .ok_or_else(|| format!("Database path is not UTF-8: {}", config.database_path.display()))?;

    let database = Database::new(database_path)
        .await
        .map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(SharedLibraryManager::new(LibraryManager::new(database)))
}

/// A file is uploaded as an archive, a directory as folder parts
fn read_upload(path: &Path) -> Result<UploadSource, String> {
    if path.is_file() {
        let name = file_name(path)?;
        let content = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        info!("Uploading archive {} ({} bytes)", name, content.len());
        return Ok(UploadSource::Archive(UploadedFile { name, content }));
    }
    if !path.is_dir() {
        return Err(format!("Not a file or directory: {}", path.display()));
    }

    // Relative paths start at the directory's own name, like a browser folder upload
    let folder_name = file_name(path)?;
    let mut parts = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(path)
            .map_err(|e| e.to_string())?
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let content =
            fs::read(entry.path()).map_err(|e| format!("{}: {}", entry.path().display(), e))?;

        parts.push(UploadedPart {
            file: UploadedFile {
                name: file_name(entry.path())?,
                content,
            },
            relative_path: format!("{}/{}", folder_name, relative),
        });
    }

    info!("Uploading {} files from {}", parts.len(), path.display());
    Ok(UploadSource::Parts(parts))
}

fn file_name(path: &Path) -> Result<String, String> {
    path.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| format!("Path has no file name: {}", path.display()))
}
