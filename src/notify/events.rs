//! Batch progress events pushed to notification channels.
//!
//! Every event serializes to JSON with a `status` discriminator, which is the
//! wire format clients see:
//!
//! - `{"status": "completed", "file": ..., "text": ...}` per transcribed file
//! - `{"status": "failed", "file": ..., "error": ...}` per failed file
//! - `{"status": "batch_completed", "total_files": ..., "results": [...]}` once,
//!   for batches of more than one file
//! - `{"status": "job_completed", "results": [...]}` once, for single-file batches

use actix::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-file summary carried by the terminal event of a batch.
///
/// Successful files carry only the original file name; failed files also
/// carry the error description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileSummary {
    pub fn ok(file: &str) -> Self {
        Self {
            file: file.to_string(),
            error: None,
        }
    }

    pub fn failed(file: &str, error: &str) -> Self {
        Self {
            file: file.to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// One event in a batch's notification sequence.
///
/// Per-file events are emitted in input order; exactly one of the two
/// terminal variants follows them, never both.
#[derive(Debug, Clone, PartialEq, Message, Serialize, Deserialize)]
#[rtype(result = "()")]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEvent {
    /// A file finished transcription and its record was saved.
    Completed { file: String, text: String },

    /// A file could not be transcribed; the rest of the batch continues.
    Failed { file: String, error: String },

    /// Terminal event for a batch of more than one file.
    BatchCompleted {
        total_files: usize,
        results: Vec<FileSummary>,
    },

    /// Terminal event for a single-file batch.
    JobCompleted { results: Vec<FileSummary> },
}
