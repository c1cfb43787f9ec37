//! Channel mixing and sample-rate conversion for captured audio.
//!
//! Whisper requires **16 kHz mono `f32`** audio while microphones deliver
//! interleaved multi-channel audio at the device rate (commonly 44.1 or
//! 48 kHz).  Capture arrives as a continuous run of small callback buffers,
//! so [`Resampler`] keeps its interpolation position between calls: feeding
//! a signal in pieces produces the same output as feeding it whole.

/// Sample rate expected by the transcription engine.
pub const TRANSCRIBE_SAMPLE_RATE: u32 = 16_000;

// ---------------------------------------------------------------------------
// downmix
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging channels.
///
/// * `channels == 1` returns the input unchanged.
/// * `channels == 0` returns an empty vector.
///
/// ```rust
/// use voice_assistant::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = usize::from(n);
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Resampler
// ---------------------------------------------------------------------------

/// Streaming linear-interpolation resampler.
///
/// ```rust
/// use voice_assistant::audio::Resampler;
///
/// let mut rs = Resampler::new(48_000, 16_000);
/// let out = rs.process(&vec![0.5_f32; 480]); // 10 ms
/// assert_eq!(out.len(), 160);
/// ```
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    /// Source samples advanced per output sample.
    step: f64,
    /// Next output position relative to the start of the next input block.
    /// Lies in `[-1, 0)` when it falls between the previous block's last
    /// sample and the next block's first.
    pos: f64,
    /// Final sample of the previous block.
    last: f32,
}

impl Resampler {
    /// # Panics
    ///
    /// Panics if either rate is zero.
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        assert!(from_rate > 0 && to_rate > 0, "sample rates must be > 0");
        Self {
            from_rate,
            to_rate,
            step: f64::from(from_rate) / f64::from(to_rate),
            pos: 0.0,
            last: 0.0,
        }
    }

    /// Convenience for the capture → transcription direction.
    pub fn to_transcription_rate(from_rate: u32) -> Self {
        Self::new(from_rate, TRANSCRIBE_SAMPLE_RATE)
    }

    /// Resample the next block of mono input.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let len = input.len() as f64;
        let mut output = Vec::with_capacity((len / self.step).ceil() as usize + 1);

        loop {
            let base = self.pos.floor();
            let next = base + 1.0;
            if next >= len {
                break;
            }
            let frac = (self.pos - base) as f32;
            let a = if base < 0.0 {
                self.last
            } else {
                input[base as usize]
            };
            let b = input[next as usize];
            output.push(a * (1.0 - frac) + b * frac);
            self.pos += self.step;
        }

        self.pos -= len;
        self.last = input[input.len() - 1];
        output
    }

    /// Forget inter-block state (start of a new recording).
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.last = 0.0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
