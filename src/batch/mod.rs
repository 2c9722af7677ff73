//! Background processing of upload batches.

pub mod processor;

pub use processor::{BatchFile, BatchProcessor};
