use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use pipeline::SignalSource;
use spectrum_analyzer::scaling::divide_by_N_sqrt;
use spectrum_analyzer::windows::hann_window;
use spectrum_analyzer::{samples_fft_to_spectrum, FrequencyLimit};
use tracing::{info, warn};

/// FFT block size; must be a power of two.
const FFT_WINDOW: usize = 1024;
/// Band analysed for the reactive scalar; music energy lives down here.
const FREQ_MIN_HZ: f32 = 20.0;
const FREQ_MAX_HZ: f32 = 4000.0;
/// Scales average band amplitude into a useful 0..~1 signal.
const SENSITIVITY: f32 = 8.0;
/// Envelope resolution of the file player source.
const ENVELOPE_WINDOWS_PER_SECOND: u32 = 30;

/// Live analyzer: captures the default input device and publishes the
/// current band amplitude for the mixer to read once per frame.
pub struct LiveAudioSource {
    level: Arc<Mutex<f32>>,
    _stream: cpal::Stream,
}

impl LiveAudioSource {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("no default audio input device")?;
        let config = device
            .default_input_config()
            .context("audio input device has no default config")?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let level = Arc::new(Mutex::new(0.0f32));
        let writer = level.clone();
        let mut window: Vec<f32> = Vec::with_capacity(FFT_WINDOW);
        let stream = device
            .build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(channels.max(1)) {
                        let mono = frame.iter().sum::<f32>() / channels.max(1) as f32;
                        window.push(mono);
                        if window.len() == FFT_WINDOW {
                            let amplitude = analyze_window(&window, sample_rate);
                            if let Ok(mut slot) = writer.lock() {
                                *slot = amplitude;
                            }
                            window.clear();
                        }
                    }
                },
                move |err| {
                    warn!(error = %err, "audio input stream error");
                },
                None,
            )
            .context("failed to open audio input stream")?;
        stream.play().context("failed to start audio input stream")?;

        info!(sample_rate, channels, "live audio analyzer running");
        Ok(Self {
            level,
            _stream: stream,
        })
    }
}

impl SignalSource for LiveAudioSource {
    fn reading(&mut self) -> f32 {
        self.level.lock().map(|slot| *slot).unwrap_or(0.0)
    }
}

fn analyze_window(samples: &[f32], sample_rate: u32) -> f32 {
    let windowed = hann_window(samples);
    match samples_fft_to_spectrum(
        &windowed,
        sample_rate,
        FrequencyLimit::Range(FREQ_MIN_HZ, FREQ_MAX_HZ),
        Some(&divide_by_N_sqrt),
    ) {
        Ok(spectrum) => {
            let data = spectrum.data();
            if data.is_empty() {
                return 0.0;
            }
            let sum: f32 = data.iter().map(|(_, value)| value.val()).sum();
            sum / data.len() as f32 * SENSITIVITY
        }
        Err(_) => 0.0,
    }
}

/// File player: decodes a WAV once into an RMS envelope and replays it
/// against a monotonic clock, reading `0.0` once the file is exhausted.
pub struct FileAudioSource {
    envelope: Vec<f32>,
    window: Duration,
    started: Instant,
}

impl FileAudioSource {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("failed to open WAV file at {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .context("failed to decode float samples")?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<Result<_, _>>()
                    .context("failed to decode integer samples")?
            }
        };
        let mono: Vec<f32> = samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let chunk = (spec.sample_rate / ENVELOPE_WINDOWS_PER_SECOND).max(1) as usize;
        let envelope = compute_envelope(&mono, chunk);
        info!(
            path = %path.display(),
            seconds = envelope.len() as f32 / ENVELOPE_WINDOWS_PER_SECOND as f32,
            "loaded audio file envelope"
        );

        Ok(Self {
            envelope,
            window: Duration::from_secs(1) / ENVELOPE_WINDOWS_PER_SECOND,
            started: Instant::now(),
        })
    }

    /// Restarts playback from the beginning of the envelope.
    pub fn rewind(&mut self) {
        self.started = Instant::now();
    }
}

impl SignalSource for FileAudioSource {
    fn reading(&mut self) -> f32 {
        let index = (self.started.elapsed().as_secs_f64() / self.window.as_secs_f64()) as usize;
        self.envelope.get(index).copied().unwrap_or(0.0)
    }
}

/// RMS per fixed-size window of mono samples.
fn compute_envelope(samples: &[f32], chunk: usize) -> Vec<f32> {
    samples
        .chunks(chunk.max(1))
        .map(|window| {
            let energy: f32 = window.iter().map(|sample| sample * sample).sum();
            (energy / window.len() as f32).sqrt()
        })
        .collect()
}
