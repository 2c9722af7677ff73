//! Durable storage of transcription results.

pub mod store;

pub use store::{TranscriptionRecord, TranscriptionStore};
