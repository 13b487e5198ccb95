mod handle;

pub use handle::IngestProgressHandle;

use crate::import::types::SkipReason;
use tokio::sync::mpsc as tokio_mpsc;

/// Progress events of one ingestion request, keyed by its request id
#[derive(Debug, Clone, PartialEq)]
pub enum IngestProgress {
    Started {
        request_id: String,
        candidates: usize,
    },
    FileSkipped {
        request_id: String,
        path: String,
        reason: SkipReason,
    },
    RecordCreated {
        request_id: String,
        record_id: String,
        name: String,
    },
    Complete {
        request_id: String,
        created: usize,
        skipped: usize,
    },
    Failed {
        request_id: String,
        error: String,
    },
}

impl IngestProgress {
    pub fn request_id(&self) -> &str {
        match self {
            IngestProgress::Started { request_id, .. }
            | IngestProgress::FileSkipped { request_id, .. }
            | IngestProgress::RecordCreated { request_id, .. }
            | IngestProgress::Complete { request_id, .. }
            | IngestProgress::Failed { request_id, .. } => request_id,
        }
    }
}

/// Publishes progress events for a single request.
///
/// Sending never fails the ingestion: a closed or absent channel just drops
/// the event.
#[derive(Clone)]
pub struct IngestProgressEmitter {
    request_id: String,
    tx: Option<tokio_mpsc::UnboundedSender<IngestProgress>>,
}

impl IngestProgressEmitter {
    pub fn new(request_id: String, tx: Option<tokio_mpsc::UnboundedSender<IngestProgress>>) -> Self {
        Self { request_id, tx }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn started(&self, candidates: usize) {
        self.send(IngestProgress::Started {
            request_id: self.request_id.clone(),
            candidates,
        });
    }

    pub fn file_skipped(&self, path: &str, reason: &SkipReason) {
        self.send(IngestProgress::FileSkipped {
            request_id: self.request_id.clone(),
            path: path.to_string(),
            reason: reason.clone(),
        });
    }

    pub fn record_created(&self, record_id: &str, name: &str) {
        self.send(IngestProgress::RecordCreated {
            request_id: self.request_id.clone(),
            record_id: record_id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn complete(&self, created: usize, skipped: usize) {
        self.send(IngestProgress::Complete {
            request_id: self.request_id.clone(),
            created,
            skipped,
        });
    }

    pub fn failed(&self, error: &str) {
        self.send(IngestProgress::Failed {
            request_id: self.request_id.clone(),
            error: error.to_string(),
        });
    }

    fn send(&self, progress: IngestProgress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitter_tags_events_with_request_id() {
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        let emitter = IngestProgressEmitter::new("req-1".to_string(), Some(tx));

        emitter.started(3);
        emitter.file_skipped("study/series.nii", &SkipReason::TimedOut);
        emitter.complete(2, 1);

        let events: Vec<IngestProgress> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.request_id() == "req-1"));
        assert_eq!(
            events[2],
            IngestProgress::Complete {
                request_id: "req-1".to_string(),
                created: 2,
                skipped: 1,
            }
        );
    }

    #[test]
    fn test_emitter_without_channel_is_silent() {
        let emitter = IngestProgressEmitter::new("req-2".to_string(), None);
        emitter.failed("boom");
    }
}
