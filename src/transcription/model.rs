//! # Whisper Model
//!
//! Loads and runs Whisper speech-to-text models with Candle-rs. Weights and
//! tokenizer are fetched from the HuggingFace hub on first load and cached
//! locally. Decoding is greedy with a temperature-fallback retry when the
//! output degenerates into repetition.
//!
//! Loading happens on a blocking worker thread (the hub client here is the
//! synchronous one), so a slow first download never stalls the server.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::sync::ApiBuilder;
use tokenizers::Tokenizer;

use crate::transcription::audio::MODEL_SAMPLE_RATE;

const N_FFT: usize = 400;
const HOP_LENGTH: usize = 160;
/// Mel frames the encoder expects for one 30 s window.
const CHUNK_FRAMES: usize = 3000;
const CHUNK_SAMPLES: usize = 30 * MODEL_SAMPLE_RATE as usize;
const MAX_DECODE_TOKENS: usize = 224;
const TEMPERATURES: &[f32] = &[0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace model repository for this size.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// A loaded Whisper model ready for transcription.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    sot_token: u32,
    eot_token: u32,
    transcribe_token: u32,
    no_timestamps_token: u32,
}

impl WhisperModel {
    /// Download (or reuse the local cache of) a model and load it.
    pub fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = ApiBuilder::new()
            .with_progress(false)
            .build()
            .map_err(|e| anyhow!("Failed to initialize HuggingFace hub client: {}", e))?;
        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo.get("config.json").map_err(|e| {
            anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e)
        })?;
        let tokenizer_filename = repo.get("tokenizer.json").map_err(|e| {
            anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e)
        })?;
        let weights_filename = repo.get("model.safetensors").map_err(|e| {
            anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e)
        })?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let mel_filters = mel_filter_bank(N_FFT / 2 + 1, config.num_mel_bins as usize);

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let sot_token = token_id(&tokenizer, "<|startoftranscript|>")?;
        let eot_token = token_id(&tokenizer, "<|endoftext|>")?;
        let transcribe_token = token_id(&tokenizer, "<|transcribe|>")?;
        let no_timestamps_token = token_id(&tokenizer, "<|notimestamps|>")?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            sot_token,
            eot_token,
            transcribe_token,
            no_timestamps_token,
        })
    }

    /// Transcribe mono 16 kHz PCM to text. Audio longer than one 30 s model
    /// window is decoded window by window and the pieces joined.
    pub fn transcribe(&mut self, audio: &[f32], language: Option<&str>) -> Result<String> {
        if audio.is_empty() {
            return Err(anyhow!("Audio stream is empty"));
        }

        let mut pieces = Vec::new();
        for segment in audio.chunks(CHUNK_SAMPLES) {
            let text = self.transcribe_segment(segment, language)?;
            if !text.is_empty() {
                pieces.push(text);
            }
        }
        Ok(pieces.join(" "))
    }

    fn transcribe_segment(&mut self, segment: &[f32], language: Option<&str>) -> Result<String> {
        let mel = self.pcm_to_mel(segment)?.unsqueeze(0)?;
        let encoder_output = self.model.encoder.forward(&mel, true)?;

        let mut tokens = vec![self.sot_token];
        if let Some(lang) = language {
            if let Some(lang_token) = self.language_token(lang) {
                tokens.push(lang_token);
            }
        }
        tokens.push(self.transcribe_token);
        tokens.push(self.no_timestamps_token);
        let prompt_len = tokens.len();

        let mut output_tokens: Vec<u32> = Vec::new();

        for &temperature in TEMPERATURES {
            tokens.truncate(prompt_len);
            output_tokens.clear();

            let mut decode_ok = true;
            for _ in 0..MAX_DECODE_TOKENS {
                let token_tensor = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
                let hidden = self
                    .model
                    .decoder
                    .forward(&token_tensor, &encoder_output, true)?;
                let (_, seq_len, _) = hidden.dims3()?;
                let logits = self
                    .model
                    .decoder
                    .final_linear(&hidden.i((.., seq_len - 1.., ..))?)?
                    .i(0)?
                    .i(0)?;

                let next_token = if temperature > 0.0 {
                    self.sample_token(&logits, temperature)?
                } else {
                    argmax(&logits.to_vec1::<f32>()?)
                };

                if next_token == self.eot_token {
                    break;
                }
                if is_repetitive(&output_tokens, next_token) {
                    decode_ok = false;
                    break;
                }

                tokens.push(next_token);
                output_tokens.push(next_token);
            }

            if decode_ok {
                break;
            }
        }

        self.decode_tokens(&output_tokens)
    }

    /// Convert PCM samples to the log-mel spectrogram the encoder expects.
    /// The window is zero-padded to the full 30 s chunk.
    fn pcm_to_mel(&self, pcm: &[f32]) -> Result<Tensor> {
        let n_mels = self.config.num_mel_bins as usize;
        let n_bins = N_FFT / 2 + 1;

        let mut padded = vec![0.0f32; CHUNK_SAMPLES];
        let copy_len = pcm.len().min(CHUNK_SAMPLES);
        padded[..copy_len].copy_from_slice(&pcm[..copy_len]);

        let window: Vec<f32> = (0..N_FFT)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / N_FFT as f32;
                0.5 * (1.0 - x.cos())
            })
            .collect();

        let mut mel = vec![0.0f32; n_mels * CHUNK_FRAMES];
        let mut spectrum = vec![0.0f32; n_bins];
        for frame in 0..CHUNK_FRAMES {
            let offset = frame * HOP_LENGTH;

            // Windowed power spectrum of this frame.
            for (bin, power) in spectrum.iter_mut().enumerate() {
                let mut re = 0.0f32;
                let mut im = 0.0f32;
                for i in 0..N_FFT {
                    let sample = if offset + i < padded.len() {
                        padded[offset + i] * window[i]
                    } else {
                        0.0
                    };
                    let angle = -2.0 * std::f32::consts::PI * (bin * i) as f32 / N_FFT as f32;
                    re += sample * angle.cos();
                    im += sample * angle.sin();
                }
                *power = re * re + im * im;
            }

            for mel_bin in 0..n_mels {
                let filters = &self.mel_filters[mel_bin * n_bins..(mel_bin + 1) * n_bins];
                let energy: f32 = filters.iter().zip(spectrum.iter()).map(|(f, s)| f * s).sum();
                mel[mel_bin * CHUNK_FRAMES + frame] = energy.max(1e-10).log10();
            }
        }

        // Whisper's dynamic-range compression: clamp to 8 dB below the peak,
        // then rescale into the range the encoder was trained on.
        let peak = mel.iter().copied().fold(f32::MIN, f32::max);
        for value in mel.iter_mut() {
            *value = (value.max(peak - 8.0) + 4.0) / 4.0;
        }

        Ok(Tensor::from_vec(mel, (n_mels, CHUNK_FRAMES), &self.device)?)
    }

    /// Token for a two-letter language code, when the model knows it.
    fn language_token(&self, language: &str) -> Option<u32> {
        self.tokenizer
            .token_to_id(&format!("<|{}|>", language.to_lowercase()))
    }

    fn sample_token(&self, logits: &Tensor, temperature: f32) -> Result<u32> {
        let scaled = logits.affine(1.0 / temperature as f64, 0.0)?;
        let probs = candle_nn::ops::softmax_last_dim(&scaled)?;
        Ok(argmax(&probs.to_vec1::<f32>()?))
    }

    fn decode_tokens(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer is missing special token {}", token))
}

fn argmax(values: &[f32]) -> u32 {
    let mut best = 0;
    for (i, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = i;
        }
    }
    best as u32
}

/// Detect degenerate decoding: a token repeated three times in a row, or the
/// last three tokens repeating the three before them.
fn is_repetitive(tokens: &[u32], next_token: u32) -> bool {
    let n = tokens.len();
    if n >= 2 && tokens[n - 2..].iter().all(|&t| t == next_token) {
        return true;
    }
    if n >= 6 && tokens[n - 3..] == tokens[n - 6..n - 3] {
        return true;
    }
    false
}

/// Triangular mel-scale filter bank over the 0..Nyquist band, row-major
/// `n_mels x n_bins`.
fn mel_filter_bank(n_bins: usize, n_mels: usize) -> Vec<f32> {
    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }
    fn mel_to_hz(mel: f32) -> f32 {
        700.0 * (10f32.powf(mel / 2595.0) - 1.0)
    }

    let nyquist = MODEL_SAMPLE_RATE as f32 / 2.0;
    let mel_max = hz_to_mel(nyquist);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let hz_per_bin = nyquist / (n_bins - 1) as f32;
    let mut filters = vec![0.0f32; n_mels * n_bins];
    for mel_bin in 0..n_mels {
        let (lo, center, hi) = (points[mel_bin], points[mel_bin + 1], points[mel_bin + 2]);
        for bin in 0..n_bins {
            let hz = bin as f32 * hz_per_bin;
            let weight = if hz <= lo || hz >= hi {
                0.0
            } else if hz <= center {
                (hz - lo) / (center - lo)
            } else {
                (hi - hz) / (hi - center)
            };
            filters[mel_bin * n_bins + bin] = weight;
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("tiny".parse::<ModelSize>().unwrap(), ModelSize::Tiny);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_display_round_trips() {
        for size in [
            ModelSize::Tiny,
            ModelSize::Base,
            ModelSize::Small,
            ModelSize::Medium,
            ModelSize::Large,
        ] {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
        }
    }

    #[test]
    fn test_mel_filter_bank_shape_and_weights() {
        let n_bins = N_FFT / 2 + 1;
        let filters = mel_filter_bank(n_bins, 80);
        assert_eq!(filters.len(), 80 * n_bins);
        assert!(filters.iter().all(|w| (0.0..=1.0).contains(w)));
        // Every filter has some support.
        for mel_bin in 0..80 {
            let row = &filters[mel_bin * n_bins..(mel_bin + 1) * n_bins];
            assert!(row.iter().any(|w| *w > 0.0), "filter {mel_bin} is empty");
        }
    }

    #[test]
    fn test_repetition_guard() {
        assert!(!is_repetitive(&[], 7));
        assert!(!is_repetitive(&[1, 2], 3));
        // Three identical tokens in a row.
        assert!(is_repetitive(&[5, 7, 7], 7));
        // A repeating three-token pattern.
        assert!(is_repetitive(&[9, 1, 2, 3, 1, 2, 3], 4));
        // Healthy sequences pass.
        assert!(!is_repetitive(&[1, 2, 3, 4, 5, 6], 9));
    }

    #[test]
    fn test_argmax_picks_largest() {
        assert_eq!(argmax(&[0.1, 0.9, 0.3]), 1);
        assert_eq!(argmax(&[2.0]), 0);
    }
}
