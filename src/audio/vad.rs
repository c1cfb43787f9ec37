//! Energy-based utterance segmentation.
//!
//! [`UtteranceSegmenter`] consumes a continuous 16 kHz mono stream and cuts
//! it into utterances: a run of speech bounded by silence.
//!
//! ## Algorithm
//!
//! Audio is split into 30 ms frames (480 samples @ 16 kHz).  A frame is
//! *voice* when its RMS amplitude exceeds the current threshold.  The first
//! voice frame opens an utterance (prefixed with a short pre-roll so soft
//! onsets are not clipped); `pause_secs` of consecutive silent frames closes
//! it.  Utterances whose voiced part is shorter than `min_utterance_secs`
//! are dropped as clicks; ones that reach `max_utterance_secs` are cut and
//! emitted as-is.
//!
//! ## Calibration
//!
//! [`UtteranceSegmenter::calibrate`] measures a stretch of ambient noise.
//! With dynamic thresholding enabled the threshold becomes
//! `max(floor, ambient_rms × 1.5)`.

use std::collections::VecDeque;

use crate::audio::resample::TRANSCRIBE_SAMPLE_RATE;

/// Samples per analysis frame (30 ms at 16 kHz).
pub const FRAME_SIZE: usize = 480;

/// Frames of audio kept before the first voice frame.
const PRE_ROLL_FRAMES: usize = 10;

/// Ambient RMS multiplier used by dynamic thresholding.
const DYNAMIC_FACTOR: f32 = 1.5;

/// Root-mean-square amplitude of `frame` (0 for an empty slice).
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
    mean_sq.sqrt()
}

// ---------------------------------------------------------------------------
// SegmenterConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Minimum RMS threshold; also the threshold before calibration.
    pub energy_threshold: f32,
    /// Raise the threshold from the calibrated ambient level.
    pub dynamic_energy: bool,
    pub pause_secs: f32,
    pub min_utterance_secs: f32,
    pub max_utterance_secs: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            dynamic_energy: true,
            pause_secs: 0.8,
            min_utterance_secs: 0.3,
            max_utterance_secs: 30.0,
        }
    }
}

impl From<&crate::config::AudioConfig> for SegmenterConfig {
    fn from(cfg: &crate::config::AudioConfig) -> Self {
        Self {
            energy_threshold: cfg.energy_threshold,
            dynamic_energy: cfg.dynamic_energy,
            pause_secs: cfg.pause_secs,
            min_utterance_secs: cfg.min_utterance_secs,
            max_utterance_secs: cfg.max_utterance_secs,
        }
    }
}

fn secs_to_frames(secs: f32) -> usize {
    let frame_secs = FRAME_SIZE as f32 / TRANSCRIBE_SAMPLE_RATE as f32;
    (secs / frame_secs).ceil().max(1.0) as usize
}

// ---------------------------------------------------------------------------
// UtteranceSegmenter
// ---------------------------------------------------------------------------

/// Streaming silence-bounded utterance detector.
///
/// # Example
///
/// ```rust
/// use voice_assistant::audio::{SegmenterConfig, UtteranceSegmenter};
///
/// let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
///
/// // 0.6 s of speech followed by 1 s of silence.
/// let mut audio = vec![0.3_f32; 9_600];
/// audio.extend(vec![0.0_f32; 16_000]);
///
/// let utterances = seg.push(&audio);
/// assert_eq!(utterances.len(), 1);
/// ```
#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    threshold: f32,
    pause_frames: usize,
    min_voice_frames: usize,
    max_frames: usize,

    /// Samples not yet forming a whole frame.
    partial: Vec<f32>,
    /// Most recent silent frames while idle.
    pre_roll: VecDeque<Vec<f32>>,
    /// Audio of the utterance in progress.
    current: Vec<f32>,
    in_speech: bool,
    voice_frames: usize,
    silent_run: usize,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            pause_frames: secs_to_frames(config.pause_secs),
            min_voice_frames: secs_to_frames(config.min_utterance_secs),
            max_frames: secs_to_frames(config.max_utterance_secs),
            config,
            partial: Vec::with_capacity(FRAME_SIZE),
            pre_roll: VecDeque::with_capacity(PRE_ROLL_FRAMES),
            current: Vec::new(),
            in_speech: false,
            voice_frames: 0,
            silent_run: 0,
        }
    }

    /// RMS threshold currently in use.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Adjust the threshold from a recording of ambient noise.
    ///
    /// Has no effect when dynamic thresholding is disabled or `ambient` is
    /// empty.  Returns the resulting threshold.
    pub fn calibrate(&mut self, ambient: &[f32]) -> f32 {
        if self.config.dynamic_energy && !ambient.is_empty() {
            let level = rms(ambient);
            self.threshold = self.config.energy_threshold.max(level * DYNAMIC_FACTOR);
            log::info!(
                "capture: ambient rms {level:.4}, energy threshold {:.4}",
                self.threshold
            );
        }
        self.threshold
    }

    /// `true` while an utterance is in progress.
    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Feed more 16 kHz mono audio; returns every utterance completed by it.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut done = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let need = FRAME_SIZE - self.partial.len();
            let take = need.min(rest.len());
            self.partial.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.partial.len() == FRAME_SIZE {
                let frame = std::mem::replace(&mut self.partial, Vec::with_capacity(FRAME_SIZE));
                if let Some(utterance) = self.push_frame(frame) {
                    done.push(utterance);
                }
            }
        }
        done
    }

    /// Drop any utterance in progress and buffered audio.
    pub fn reset(&mut self) {
        self.partial.clear();
        self.pre_roll.clear();
        self.current.clear();
        self.in_speech = false;
        self.voice_frames = 0;
        self.silent_run = 0;
    }

    fn push_frame(&mut self, frame: Vec<f32>) -> Option<Vec<f32>> {
        let voice = rms(&frame) > self.threshold;

        if !self.in_speech {
            if !voice {
                if self.pre_roll.len() == PRE_ROLL_FRAMES {
                    self.pre_roll.pop_front();
                }
                self.pre_roll.push_back(frame);
                return None;
            }
            self.in_speech = true;
            self.current.clear();
            for f in self.pre_roll.drain(..) {
                self.current.extend_from_slice(&f);
            }
        }

        self.current.extend_from_slice(&frame);
        if voice {
            self.voice_frames += 1;
            self.silent_run = 0;
        } else {
            self.silent_run += 1;
        }

        let frames = self.current.len() / FRAME_SIZE;
        if self.silent_run >= self.pause_frames || frames >= self.max_frames {
            return self.close();
        }
        None
    }

    fn close(&mut self) -> Option<Vec<f32>> {
        let voiced = self.voice_frames;
        let audio = std::mem::take(&mut self.current);
        self.in_speech = false;
        self.voice_frames = 0;
        self.silent_run = 0;

        if voiced < self.min_voice_frames {
            log::debug!("capture: dropped {voiced}-frame blip");
            return None;
        }
        Some(audio)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(parts: &[(f32, usize)]) -> Vec<f32> {
        parts
            .iter()
            .flat_map(|&(amp, len)| std::iter::repeat(amp).take(len))
            .collect()
    }

    #[test]
    fn rms_of_constant_is_its_magnitude() {
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
        assert!((rms(&[-0.5; 100]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn speech_then_pause_yields_one_utterance() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        let out = seg.push(&signal(&[(0.0, 4_800), (0.3, 9_600), (0.0, 16_000)]));
        assert_eq!(out.len(), 1);
        // Pre-roll (10 frames) + speech + closing pause.
        assert!(out[0].len() >= 9_600 + PRE_ROLL_FRAMES * FRAME_SIZE);
        assert!(!seg.in_speech());
    }

    #[test]
    fn silence_yields_nothing() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        assert!(seg.push(&vec![0.0; 48_000]).is_empty());
    }

    #[test]
    fn short_blip_is_dropped() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        // 60 ms of sound is below the 0.3 s minimum.
        let out = seg.push(&signal(&[(0.5, 960), (0.0, 16_000)]));
        assert!(out.is_empty());
    }

    #[test]
    fn utterance_without_pause_stays_open() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        assert!(seg.push(&vec![0.3; 16_000]).is_empty());
        assert!(seg.in_speech());
        let out = seg.push(&vec![0.0; 16_000]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn long_speech_is_cut_at_max_length() {
        let config = SegmenterConfig {
            max_utterance_secs: 1.0,
            ..SegmenterConfig::default()
        };
        let mut seg = UtteranceSegmenter::new(config);
        let out = seg.push(&vec![0.3; 40_000]);
        assert_eq!(out.len(), 2);
        assert!(out[0].len() <= 16_000 + FRAME_SIZE);
    }

    #[test]
    fn frames_straddling_pushes_are_joined() {
        let mut a = UtteranceSegmenter::new(SegmenterConfig::default());
        let mut b = UtteranceSegmenter::new(SegmenterConfig::default());
        let audio = signal(&[(0.3, 9_600), (0.0, 16_000)]);

        let whole = a.push(&audio);
        let mut pieces = Vec::new();
        for block in audio.chunks(333) {
            pieces.extend(b.push(block));
        }
        assert_eq!(whole, pieces);
    }

    #[test]
    fn calibration_raises_threshold_above_ambient() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        let threshold = seg.calibrate(&vec![0.1; 48_000]);
        assert!((threshold - 0.15).abs() < 1e-5);

        // Noise at the ambient level no longer opens an utterance.
        assert!(seg.push(&vec![0.1; 32_000]).is_empty());
        assert!(!seg.in_speech());
    }

    #[test]
    fn calibration_never_goes_below_floor() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        assert!((seg.calibrate(&vec![0.001; 1_000]) - 0.02).abs() < 1e-7);
    }

    #[test]
    fn static_threshold_ignores_calibration() {
        let config = SegmenterConfig {
            dynamic_energy: false,
            ..SegmenterConfig::default()
        };
        let mut seg = UtteranceSegmenter::new(config);
        assert!((seg.calibrate(&vec![0.4; 1_000]) - 0.02).abs() < 1e-7);
    }

    #[test]
    fn reset_discards_partial_utterance() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        seg.push(&vec![0.3; 8_000]);
        assert!(seg.in_speech());
        seg.reset();
        assert!(!seg.in_speech());
        assert!(seg.push(&vec![0.0; 16_000]).is_empty());
    }
}
