//! # Batch Processor
//!
//! Drains one upload batch: each file is transcribed in input order, its
//! result persisted, and a `completed` (or `failed`) event broadcast to
//! every channel currently registered for the batch. After the last file a
//! single terminal event follows: `batch_completed` for multi-file batches,
//! `job_completed` for single-file ones.
//!
//! A failed file never aborts the rest of the batch, and nothing in here is
//! allowed to escape into the spawned task: every per-file and per-send
//! failure is handled at its own scope. Broadcast targets are looked up
//! fresh per event, so channels that connect mid-batch receive everything
//! emitted after they register.

use crate::db::TranscriptionStore;
use crate::notify::{BatchEvent, FileSummary, NotificationRegistry};
use crate::transcription::SpeechToText;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One file within a batch: where its bytes were stored and what the client
/// called it.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub path: PathBuf,
    pub original_name: String,
}

pub struct BatchProcessor {
    engine: Arc<dyn SpeechToText>,
    store: TranscriptionStore,
    registry: Arc<NotificationRegistry>,
}

impl BatchProcessor {
    pub fn new(
        engine: Arc<dyn SpeechToText>,
        store: TranscriptionStore,
        registry: Arc<NotificationRegistry>,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
        }
    }

    /// Schedule a batch as a detached background task. The caller gets no
    /// handle back; completion is observable only through the store and the
    /// notification registry.
    pub fn spawn(self: Arc<Self>, batch_uuid: Uuid, files: Vec<BatchFile>) {
        tokio::spawn(async move {
            self.process_batch(batch_uuid, files).await;
        });
    }

    /// Process every file of a batch in order. An empty batch is a no-op:
    /// no events, no records.
    pub async fn process_batch(&self, batch_uuid: Uuid, files: Vec<BatchFile>) {
        if files.is_empty() {
            debug!(%batch_uuid, "Empty batch, nothing to process");
            return;
        }

        let total_files = files.len();
        info!(%batch_uuid, total_files, "Batch processing started");

        let mut results = Vec::with_capacity(total_files);
        for file in files {
            match self.transcribe_file(&file).await {
                Ok(text) => match self
                    .store
                    .save(&file.path.to_string_lossy(), &file.original_name, &text)
                    .await
                {
                    Ok(()) => {
                        results.push(FileSummary::ok(&file.original_name));
                        self.broadcast(
                            batch_uuid,
                            BatchEvent::Completed {
                                file: file.original_name.clone(),
                                text,
                            },
                        );
                    }
                    Err(e) => {
                        error!(
                            %batch_uuid,
                            file = %file.original_name,
                            error = %e,
                            "Failed to save transcription record"
                        );
                        results.push(FileSummary::failed(&file.original_name, &e.to_string()));
                        self.broadcast(
                            batch_uuid,
                            BatchEvent::Failed {
                                file: file.original_name.clone(),
                                error: e.to_string(),
                            },
                        );
                    }
                },
                Err(e) => {
                    error!(
                        %batch_uuid,
                        file = %file.original_name,
                        error = %e,
                        "Transcription failed, continuing with remaining files"
                    );
                    results.push(FileSummary::failed(&file.original_name, &e.to_string()));
                    self.broadcast(
                        batch_uuid,
                        BatchEvent::Failed {
                            file: file.original_name.clone(),
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        let terminal = if total_files > 1 {
            BatchEvent::BatchCompleted {
                total_files,
                results,
            }
        } else {
            BatchEvent::JobCompleted { results }
        };
        self.broadcast(batch_uuid, terminal);

        info!(%batch_uuid, "Batch processing finished");
    }

    /// Run the engine on a blocking worker thread so inference never stalls
    /// the reactor.
    async fn transcribe_file(&self, file: &BatchFile) -> anyhow::Result<String> {
        let engine = Arc::clone(&self.engine);
        let path = file.path.clone();
        tokio::task::spawn_blocking(move || engine.transcribe(&path))
            .await
            .map_err(|e| anyhow::anyhow!("Transcription task panicked: {}", e))?
    }

    /// Send one event to every channel registered for the batch right now.
    /// A send that loses the race with a disconnect is logged and ignored;
    /// it never affects other channels or the batch.
    fn broadcast(&self, batch_uuid: Uuid, event: BatchEvent) {
        for target in self.registry.broadcast_targets(batch_uuid) {
            if let Err(e) = target.try_send(event.clone()) {
                warn!(%batch_uuid, error = %e, "Dropping event for closed notification channel");
            }
        }
    }
}
