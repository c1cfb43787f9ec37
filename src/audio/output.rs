//! Speaker output via `cpal`.
//!
//! [`AudioOutput`] opens the default output device at the synthesis sample
//! rate (24 kHz) and drives a [`DeviceCallback`] from the hardware audio
//! thread.  The callback pulls exactly one hardware buffer's worth of samples
//! from the [`PlaybackConsumer`] per invocation, so the stream is never
//! starved: gaps between sentences are filled with silence.
//!
//! The stream is opened once at startup and kept running for the lifetime of
//! the process; a missing device is a fatal startup error.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use thiserror::Error;

use crate::audio::playback::PlaybackConsumer;

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the speaker stream.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query supported output configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("output device supports no f32 stream at {0} Hz")]
    NoSuitableConfig(u32),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// DeviceCallback
// ---------------------------------------------------------------------------

/// The body of the hardware output callback.
///
/// Renders mono playback audio into an interleaved device buffer.  The
/// scratch buffer grows to the largest block the device has asked for and is
/// reused afterwards, so steady-state invocations do not allocate.
pub struct DeviceCallback {
    consumer: PlaybackConsumer,
    channels: usize,
    scratch: Vec<f32>,
}

impl DeviceCallback {
    pub fn new(consumer: PlaybackConsumer, channels: u16) -> Self {
        Self {
            consumer,
            channels: usize::from(channels.max(1)),
            scratch: Vec::new(),
        }
    }

    /// Fill `data` (interleaved, `channels` wide).  Returns the stop flag of
    /// the underlying pull.
    pub fn render(&mut self, data: &mut [f32]) -> bool {
        if self.channels == 1 {
            return self.consumer.fill(data);
        }

        let frames = data.len() / self.channels;
        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0.0);
        }
        let mono = &mut self.scratch[..frames];
        let stop = self.consumer.fill(mono);

        for (frame, &sample) in data.chunks_mut(self.channels).zip(mono.iter()) {
            frame.fill(sample);
        }
        // A trailing partial frame can only appear with a malformed buffer.
        let tail = frames * self.channels;
        data[tail..].fill(0.0);
        stop
    }
}

// ---------------------------------------------------------------------------
// OutputHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps the output stream alive.
pub struct OutputHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Default output device opened for mono (or up-mixed stereo) `f32` audio.
pub struct AudioOutput {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

impl AudioOutput {
    /// Open the default output device at `sample_rate`, requesting hardware
    /// buffers of `frames_per_buffer` frames.
    ///
    /// Prefers a mono configuration and falls back to stereo.
    pub fn new(sample_rate: u32, frames_per_buffer: u32) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        let rate = SampleRate(sample_rate);
        let supports = |range: &cpal::SupportedStreamConfigRange, channels: u16| {
            range.channels() == channels
                && range.sample_format() == SampleFormat::F32
                && range.min_sample_rate() <= rate
                && range.max_sample_rate() >= rate
        };

        let ranges: Vec<_> = device.supported_output_configs()?.collect();
        let range = ranges
            .iter()
            .find(|r| supports(r, 1))
            .or_else(|| ranges.iter().find(|r| supports(r, 2)))
            .cloned()
            .ok_or(OutputError::NoSuitableConfig(sample_rate))?;

        let buffer_size = match range.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&frames_per_buffer) =>
            {
                cpal::BufferSize::Fixed(frames_per_buffer)
            }
            _ => cpal::BufferSize::Default,
        };
        let mut config = range.with_sample_rate(rate).config();
        config.buffer_size = buffer_size;

        log::info!(
            "playback: output device {} ({} Hz, {} ch, buffer {:?})",
            device.name().unwrap_or_default(),
            sample_rate,
            config.channels,
            config.buffer_size
        );

        Ok(Self { device, config })
    }

    /// Start the stream.  `consumer` moves into the hardware callback.
    pub fn start(&self, consumer: PlaybackConsumer) -> Result<OutputHandle, OutputError> {
        let mut callback = DeviceCallback::new(consumer, self.config.channels);

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                callback.render(data);
            },
            |err: cpal::StreamError| {
                log::error!("playback: cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(OutputHandle { _stream: stream })
    }

    /// Channel count of the opened stream.
    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::{playback_buffer, AudioChunk};

    #[test]
    fn mono_render_passes_samples_through() {
        let (producer, consumer) = playback_buffer(4);
        producer
            .push(AudioChunk::Samples(vec![0.1, 0.2, 0.3, 0.4]))
            .unwrap();

        let mut cb = DeviceCallback::new(consumer, 1);
        let mut data = [9.0_f32; 3];
        assert!(!cb.render(&mut data));
        assert_eq!(data, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn stereo_render_duplicates_each_sample() {
        let (producer, consumer) = playback_buffer(4);
        producer.push(AudioChunk::Samples(vec![0.5, -0.5])).unwrap();
        producer.push(AudioChunk::EndOfUtterance).unwrap();

        let mut cb = DeviceCallback::new(consumer, 2);
        let mut data = [9.0_f32; 6];
        assert!(cb.render(&mut data));
        assert_eq!(data, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn scratch_is_reused_between_blocks() {
        let (_producer, consumer) = playback_buffer(4);
        let mut cb = DeviceCallback::new(consumer, 2);

        let mut data = vec![1.0_f32; 2048];
        cb.render(&mut data);
        let capacity = cb.scratch.capacity();
        cb.render(&mut data);
        cb.render(&mut data[..512]);

        assert_eq!(cb.scratch.capacity(), capacity);
        assert!(data.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn zero_channels_is_treated_as_mono() {
        let (_producer, consumer) = playback_buffer(1);
        let cb = DeviceCallback::new(consumer, 0);
        assert_eq!(cb.channels, 1);
    }
}
