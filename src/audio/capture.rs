//! Host Microphone Capture
//!
//! Feeds the default input device of a desktop machine through the same
//! peripheral interface the board microphones use. Pin assignments have no
//! meaning here and are only logged.

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::source::{MicrophonePins, PcmPeripheral};
use crate::data::AudioConfig;

/// About two seconds at 16 kHz
const MAX_BUFFERED_SAMPLES: usize = 32_000;

/// Default input device captured through cpal
pub struct CpalMicrophone {
    stream: Option<cpal::Stream>,
    buffer: Arc<Mutex<VecDeque<i16>>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            stream: None,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_BUFFERED_SAMPLES))),
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmPeripheral for CpalMicrophone {
    fn begin(&mut self, pins: &MicrophonePins, audio: &AudioConfig) -> Result<()> {
        tracing::debug!("Ignoring board pins {:?} on host capture", pins);

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device"))?;
        tracing::info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = cpal::StreamConfig {
            channels: audio.channels,
            sample_rate: cpal::SampleRate(audio.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = self.buffer.clone();
        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let Ok(mut buffer) = buffer.lock() else {
                    return;
                };
                for &sample in data {
                    if buffer.len() >= MAX_BUFFERED_SAMPLES {
                        buffer.pop_front();
                    }
                    buffer.push_back((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }
            },
            |err| {
                tracing::error!("Audio stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;

        self.stream = Some(stream);
        Ok(())
    }

    fn try_read(&mut self) -> Option<i16> {
        self.buffer.lock().ok()?.pop_front()
    }
}
