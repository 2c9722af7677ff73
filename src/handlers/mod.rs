pub mod transcriptions;

pub use transcriptions::{list_transcriptions, search_transcriptions, transcribe};
