//! # Transcription Engine
//!
//! The seam between the batch pipeline and the speech model. The pipeline
//! only depends on the [`SpeechToText`] trait, so tests substitute scripted
//! doubles and the Whisper-backed engine stays swappable.

use crate::config::ModelsConfig;
use crate::transcription::audio;
use crate::transcription::model::{ModelSize, WhisperModel};
use anyhow::Result;
use candle_core::Device;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Converts one stored audio file into text.
///
/// Implementations may be slow (seconds per file) and may fail per file;
/// callers invoke them from blocking worker threads, never from the async
/// reactor.
pub trait SpeechToText: Send + Sync {
    fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// Whisper-backed engine. Holds at most one loaded model, initialized on
/// first use and kept for the process lifetime.
pub struct TranscriptionEngine {
    model_size: ModelSize,
    language: Option<String>,
    device: Device,
    model: Mutex<Option<WhisperModel>>,
}

impl TranscriptionEngine {
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let model_size: ModelSize = config.whisper_model.parse()?;
        let language = if config.language.is_empty() {
            None
        } else {
            Some(config.language.clone())
        };

        Ok(Self {
            model_size,
            language,
            device: Device::Cpu,
            model: Mutex::new(None),
        })
    }
}

impl SpeechToText for TranscriptionEngine {
    fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let samples = audio::load_audio(audio_path)?;
        debug!(
            path = %audio_path.display(),
            seconds = samples.len() as f64 / audio::MODEL_SAMPLE_RATE as f64,
            "Audio decoded for transcription"
        );

        let mut guard = self.model.lock().unwrap();
        if guard.is_none() {
            *guard = Some(WhisperModel::load(self.model_size, self.device.clone())?);
        }
        let model = guard.as_mut().expect("model initialized above");

        model.transcribe(&samples, self.language.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_engine_construction_from_config() {
        let config = AppConfig::default();
        let engine = TranscriptionEngine::new(&config.models).unwrap();
        assert_eq!(engine.model_size, ModelSize::Tiny);
        assert_eq!(engine.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_engine_rejects_unknown_model() {
        let mut config = AppConfig::default();
        config.models.whisper_model = "gigantic".to_string();
        assert!(TranscriptionEngine::new(&config.models).is_err());
    }

    #[test]
    fn test_empty_language_means_autodetect() {
        let mut config = AppConfig::default();
        config.models.language = String::new();
        let engine = TranscriptionEngine::new(&config.models).unwrap();
        assert!(engine.language.is_none());
    }
}
