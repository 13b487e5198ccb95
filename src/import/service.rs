// # Ingest Service - Orchestrator
//
// Sequences one ingestion request:
// - Stager: materializes the upload in an exclusively-owned temp directory
// - Discoverer: lists candidate volumes in the staged tree
// - Pipeline: classifies, normalizes and names each file on blocking workers
// - Record store: persists one map record per accepted file
//
// The staging area is removed on every exit path. Per-file failures become
// skip entries in the report; staging failures abort the request.

use crate::config::Config;
use crate::db::{DbCollection, NewMapRecord};
use crate::import::pipeline::{build_pipeline, PreparedFile};
use crate::import::progress::{IngestProgress, IngestProgressEmitter, IngestProgressHandle};
use crate::import::staging::StagingArea;
use crate::import::types::{IngestError, IngestReport, UploadSource};
use crate::import::volume_scanner::{discover_volumes, CandidateFile};
use crate::library::MapRecordStore;
use futures::StreamExt;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Parent of staging areas (system temp dir if None)
    pub staging_dir: Option<PathBuf>,
    /// Files classified/normalized concurrently
    pub max_workers: usize,
    /// Deadline for one file's classify + normalize
    pub file_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            staging_dir: None,
            max_workers: 4,
            file_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&Config> for IngestConfig {
    fn from(config: &Config) -> Self {
        IngestConfig {
            staging_dir: config.staging_dir.clone(),
            max_workers: config.max_workers,
            file_timeout: config.file_timeout,
        }
    }
}

/// Cooperative cancellation for one request, checked before each file
#[derive(Debug, Clone, Default)]
pub struct IngestCancellation {
    cancelled: Arc<AtomicBool>,
}

impl IngestCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Ingestion request queued on a running service
struct IngestRequest {
    request_id: String,
    collection: DbCollection,
    source: UploadSource,
    cancellation: IngestCancellation,
    result_tx: oneshot::Sender<Result<IngestReport, IngestError>>,
}

/// A submitted request: its id, a way to cancel it, its progress and its result
pub struct IngestTicket {
    pub request_id: String,
    pub cancellation: IngestCancellation,
    pub progress: mpsc::UnboundedReceiver<IngestProgress>,
    result_rx: oneshot::Receiver<Result<IngestReport, IngestError>>,
}

impl IngestTicket {
    /// Wait for the request to finish
    pub async fn wait(self) -> Result<IngestReport, IngestError> {
        self.result_rx
            .await
            .map_err(|_| IngestError::Worker("ingest worker dropped the request".to_string()))?
    }
}

/// Handle for submitting requests to a service started with `IngestService::start`
#[derive(Clone)]
pub struct IngestServiceHandle {
    request_tx: mpsc::UnboundedSender<IngestRequest>,
    progress_handle: IngestProgressHandle,
}

impl IngestServiceHandle {
    /// Queue an upload for ingestion into `collection`
    pub fn submit(
        &self,
        collection: DbCollection,
        source: UploadSource,
    ) -> Result<IngestTicket, IngestError> {
        let request_id = Uuid::new_v4().to_string();
        let cancellation = IngestCancellation::new();
        // Subscribe before queueing so no event is missed
        let progress = self.progress_handle.subscribe_request(request_id.clone());
        let (result_tx, result_rx) = oneshot::channel();

        self.request_tx
            .send(IngestRequest {
                request_id: request_id.clone(),
                collection,
                source,
                cancellation: cancellation.clone(),
                result_tx,
            })
            .map_err(|_| IngestError::Worker("ingest service is not running".to_string()))?;

        Ok(IngestTicket {
            request_id,
            cancellation,
            progress,
            result_rx,
        })
    }

    /// Progress of every request handled by this service
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<IngestProgress> {
        self.progress_handle.subscribe_all()
    }
}

/// Ingestion orchestrator
#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn MapRecordStore>,
    config: IngestConfig,
    progress_tx: Option<mpsc::UnboundedSender<IngestProgress>>,
}

impl IngestService {
    pub fn new(store: Arc<dyn MapRecordStore>, config: IngestConfig) -> Self {
        IngestService {
            store,
            config,
            progress_tx: None,
        }
    }

    /// Publish progress events on `progress_tx`
    pub fn with_progress(mut self, progress_tx: mpsc::UnboundedSender<IngestProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    /// Run a request worker on the given runtime. Requests are processed
    /// concurrently, each on its own task.
    pub fn start(
        runtime_handle: tokio::runtime::Handle,
        store: Arc<dyn MapRecordStore>,
        config: IngestConfig,
    ) -> IngestServiceHandle {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let service = IngestService::new(store, config).with_progress(progress_tx);
        runtime_handle.spawn(service.listen_for_requests(request_rx));

        let progress_handle = IngestProgressHandle::new(progress_rx, runtime_handle);

        IngestServiceHandle {
            request_tx,
            progress_handle,
        }
    }

    async fn listen_for_requests(self, mut request_rx: mpsc::UnboundedReceiver<IngestRequest>) {
        info!("Ingest worker started");

        while let Some(request) = request_rx.recv().await {
            let service = self.clone();
            tokio::spawn(async move {
                let result = service
                    .run(
                        request.request_id,
                        &request.collection,
                        request.source,
                        &request.cancellation,
                    )
                    .await;
                // The submitter may have stopped waiting
                let _ = request.result_tx.send(result);
            });
        }

        info!("Ingest request channel closed, worker exiting");
    }

    /// Ingest an upload into `collection`
    pub async fn ingest(
        &self,
        collection: &DbCollection,
        source: UploadSource,
    ) -> Result<IngestReport, IngestError> {
        self.ingest_with_cancellation(collection, source, &IngestCancellation::new())
            .await
    }

    /// Ingest an upload, stopping early if `cancellation` is set.
    ///
    /// Records persisted before cancellation are kept.
    pub async fn ingest_with_cancellation(
        &self,
        collection: &DbCollection,
        source: UploadSource,
        cancellation: &IngestCancellation,
    ) -> Result<IngestReport, IngestError> {
        self.run(Uuid::new_v4().to_string(), collection, source, cancellation)
            .await
    }

    async fn run(
        &self,
        request_id: String,
        collection: &DbCollection,
        source: UploadSource,
        cancellation: &IngestCancellation,
    ) -> Result<IngestReport, IngestError> {
        let emitter = IngestProgressEmitter::new(request_id, self.progress_tx.clone());
        info!(
            "Ingest {}: staging upload for collection {}",
            emitter.request_id(),
            collection.id
        );

        // 1. Stage (a failed stage leaves nothing behind)
        let staging = match self.stage(source).await {
            Ok(staging) => staging,
            Err(e) => {
                error!("Ingest {}: {}", emitter.request_id(), e);
                emitter.failed(&e.to_string());
                return Err(e);
            }
        };

        // 2-3. Discover, prepare and persist
        let result = self
            .ingest_staged(&staging, collection, &emitter, cancellation)
            .await;

        // 4. Cleanup, whatever happened above
        self.cleanup(staging).await;

        match &result {
            Ok(report) => {
                info!(
                    "Ingest {}: {} records created, {} files skipped",
                    report.request_id,
                    report.created.len(),
                    report.skipped.len()
                );
                emitter.complete(report.created.len(), report.skipped.len());
            }
            Err(e) => {
                error!("Ingest {} failed: {}", emitter.request_id(), e);
                emitter.failed(&e.to_string());
            }
        }
        result
    }

    async fn stage(&self, source: UploadSource) -> Result<StagingArea, IngestError> {
        let staging_dir = self.config.staging_dir.clone();
        let staging = tokio::task::spawn_blocking(move || {
            StagingArea::stage(source, staging_dir.as_deref())
        })
        .await
        .map_err(|e| IngestError::Worker(format!("staging task failed: {}", e)))??;
        Ok(staging)
    }

    async fn ingest_staged(
        &self,
        staging: &StagingArea,
        collection: &DbCollection,
        emitter: &IngestProgressEmitter,
        cancellation: &IngestCancellation,
    ) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport {
            request_id: emitter.request_id().to_string(),
            created: Vec::new(),
            skipped: Vec::new(),
        };

        let root = staging.root().to_path_buf();
        let candidates: Vec<CandidateFile> =
            tokio::task::spawn_blocking(move || discover_volumes(&root).collect::<Vec<_>>())
                .await
                .map_err(|e| IngestError::Worker(format!("discovery task failed: {}", e)))?;

        info!(
            "Ingest {}: found {} candidate volumes",
            report.request_id,
            candidates.len()
        );
        emitter.started(candidates.len());

        let mut prepared = pin!(build_pipeline(
            candidates,
            staging.root().to_path_buf(),
            &self.config,
            cancellation.clone(),
        ));

        while let Some(file) = prepared.next().await {
            if cancellation.is_cancelled() {
                break;
            }
            match file {
                PreparedFile::Ready(volume) => {
                    let record = self
                        .store
                        .create_map_record(NewMapRecord {
                            collection_id: collection.id,
                            name: volume.name,
                            description: volume.description,
                            map_type: volume.map_type,
                            content: volume.content,
                        })
                        .await?;

                    info!(
                        "Ingest {}: created record {} '{}' from {}",
                        report.request_id, record.id, record.name, volume.path
                    );
                    emitter.record_created(&record.id, &record.name);
                    report.created.push(record);
                }
                PreparedFile::Skipped(skipped) => {
                    warn!(
                        "Ingest {}: skipping {}: {}",
                        report.request_id, skipped.path, skipped.reason
                    );
                    emitter.file_skipped(&skipped.path, &skipped.reason);
                    report.skipped.push(skipped);
                }
            }
        }

        if cancellation.is_cancelled() {
            info!(
                "Ingest {}: cancelled after {} records",
                report.request_id,
                report.created.len()
            );
            return Err(IngestError::Cancelled);
        }
        Ok(report)
    }

    async fn cleanup(&self, staging: StagingArea) {
        let root = staging.root().to_path_buf();
        match tokio::task::spawn_blocking(move || staging.close()).await {
            Ok(Ok(())) => info!("Removed staging area {}", root.display()),
            Ok(Err(e)) => warn!("Failed to remove staging area {}: {}", root.display(), e),
            Err(e) => warn!("Cleanup task for {} failed: {}", root.display(), e),
        }
    }
}
