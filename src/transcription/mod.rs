//! # Transcription
//!
//! Speech-to-text on uploaded audio files, using Whisper models via the
//! Candle-rs framework (pure Rust, no FFI bindings to whisper.cpp).
//!
//! ## Key Components:
//! - **Audio decoding**: wav/mp3/m4a containers to mono 16 kHz PCM
//! - **Model management**: downloading and loading Whisper weights
//! - **Engine**: the `SpeechToText` seam the batch pipeline depends on

pub mod audio;
pub mod engine;
pub mod model;

pub use engine::{SpeechToText, TranscriptionEngine};
pub use model::ModelSize;
