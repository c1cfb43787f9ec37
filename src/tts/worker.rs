//! Per-utterance synthesis thread.
//!
//! A [`SynthesisWorker`] owns one spoken reply.  The controller feeds it
//! sentences as the [`SentenceSplitter`] completes them; the worker thread
//! synthesizes them one at a time, in order, and pushes the audio onto the
//! playback buffer.  When the sentence channel closes it pushes exactly one
//! [`AudioChunk::EndOfUtterance`], even if synthesis failed or panicked, so
//! the device callback always sees the end of the reply.
//!
//! ```text
//! controller ──sentence──▶ [worker thread] ──Samples…──▶ PlaybackBuffer
//!            ──(close)───▶                 ──EndOfUtterance──▶
//! ```
//!
//! [`SentenceSplitter`]: crate::tts::SentenceSplitter

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;

use crate::audio::playback::{AudioChunk, PlaybackProducer};
use crate::tts::synthesizer::Synthesizer;

// ---------------------------------------------------------------------------
// WorkerReport
// ---------------------------------------------------------------------------

/// Summary of one utterance, delivered when the worker finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Sentences synthesized successfully.
    pub sentences: usize,
    /// Audio chunks pushed to playback.
    pub chunks: usize,
    /// Sentences dropped because synthesis failed.
    pub failures: usize,
}

// ---------------------------------------------------------------------------
// SynthesisWorker
// ---------------------------------------------------------------------------

pub struct SynthesisWorker {
    sentences: Sender<String>,
    done: oneshot::Receiver<WorkerReport>,
}

impl SynthesisWorker {
    /// Start the worker thread for a new utterance.
    pub fn spawn(
        synthesizer: Arc<dyn Synthesizer>,
        voice: impl Into<String>,
        playback: PlaybackProducer,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        let (done_tx, done_rx) = oneshot::channel();
        let voice = voice.into();

        std::thread::Builder::new()
            .name("synthesis".into())
            .spawn(move || {
                let report = run(synthesizer.as_ref(), &voice, rx, playback);
                // The controller may have stopped waiting; nothing to do then.
                let _ = done_tx.send(report);
            })?;

        Ok(Self {
            sentences: tx,
            done: done_rx,
        })
    }

    /// Queue a completed sentence.  Never blocks.
    pub fn speak(&self, sentence: impl Into<String>) {
        if self.sentences.send(sentence.into()).is_err() {
            log::warn!("synthesis: worker exited early, sentence dropped");
        }
    }

    /// Close the sentence stream and wait until every sentence has been
    /// synthesized and the end marker queued.
    ///
    /// This does not wait for the audio to be *played*; use
    /// [`PlaybackMonitor`](crate::audio::PlaybackMonitor) for that.
    pub async fn finish(self) -> WorkerReport {
        drop(self.sentences);
        self.done.await.unwrap_or_else(|_| {
            log::warn!("synthesis: worker thread ended without a report");
            WorkerReport::default()
        })
    }
}

/// Pushes the end marker when dropped, including during a panic unwind.
struct EndGuard<'a> {
    playback: &'a PlaybackProducer,
}

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        if self.playback.push(AudioChunk::EndOfUtterance).is_err() {
            log::warn!("synthesis: playback closed before end of utterance");
        }
    }
}

fn run(
    synthesizer: &dyn Synthesizer,
    voice: &str,
    sentences: Receiver<String>,
    playback: PlaybackProducer,
) -> WorkerReport {
    let _end = EndGuard {
        playback: &playback,
    };
    let mut report = WorkerReport::default();

    for sentence in sentences.iter() {
        let text = sentence.trim();
        if text.is_empty() {
            continue;
        }

        match synthesizer.synthesize(text, voice) {
            Ok(blocks) => {
                report.sentences += 1;
                for block in blocks.into_iter().filter(|b| !b.is_empty()) {
                    if playback.push(AudioChunk::Samples(block)).is_err() {
                        log::warn!("synthesis: playback closed, abandoning utterance");
                        return report;
                    }
                    report.chunks += 1;
                }
            }
            Err(e) => {
                log::warn!("synthesis: failed for {text:?}: {e}");
                report.failures += 1;
            }
        }
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::{playback_buffer, PlaybackConsumer};
    use crate::tts::synthesizer::{MockSynthesizer, SynthesisError};

    /// Drain every queued item from the consumer side, the way the device
    /// callback would, returning (samples, end markers seen).
    fn drain(consumer: &mut PlaybackConsumer) -> (Vec<f32>, usize) {
        let mut samples = Vec::new();
        let mut ends = 0;
        for _ in 0..64 {
            let (block, stop) = consumer.pull_exact(4);
            samples.extend(block.into_iter().filter(|&s| s != 0.0));
            if stop {
                ends += 1;
            }
        }
        (samples, ends)
    }

    #[tokio::test]
    async fn sentences_are_synthesized_in_order_then_ended() {
        let (producer, mut consumer) = playback_buffer(16);
        let synth = Arc::new(MockSynthesizer::new(vec![0.5; 3], 1));
        let worker = SynthesisWorker::spawn(synth.clone(), "af_heart", producer).unwrap();

        worker.speak("First.");
        worker.speak(" Second!");
        let report = worker.finish().await;

        assert_eq!(
            report,
            WorkerReport {
                sentences: 2,
                chunks: 2,
                failures: 0
            }
        );
        let spoken: Vec<String> = synth.spoken().into_iter().map(|(t, _)| t).collect();
        assert_eq!(spoken, vec!["First.", "Second!"]);

        let (samples, ends) = drain(&mut consumer);
        assert_eq!(samples.len(), 6);
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn blank_sentences_are_skipped() {
        let (producer, _consumer) = playback_buffer(16);
        let synth = Arc::new(MockSynthesizer::new(vec![0.5; 3], 1));
        let worker = SynthesisWorker::spawn(synth.clone(), "v", producer).unwrap();

        worker.speak("  \n");
        worker.speak("");
        let report = worker.finish().await;

        assert_eq!(report.sentences, 0);
        assert!(synth.spoken().is_empty());
    }

    #[tokio::test]
    async fn failures_still_end_the_utterance() {
        let (producer, mut consumer) = playback_buffer(16);
        let worker =
            SynthesisWorker::spawn(Arc::new(MockSynthesizer::failing()), "v", producer).unwrap();

        worker.speak("This will fail.");
        let report = worker.finish().await;

        assert_eq!(report.failures, 1);
        let (samples, ends) = drain(&mut consumer);
        assert!(samples.is_empty());
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn empty_reply_still_ends_the_utterance() {
        let (producer, mut consumer) = playback_buffer(4);
        let worker = SynthesisWorker::spawn(
            Arc::new(MockSynthesizer::new(vec![0.5; 3], 1)),
            "v",
            producer,
        )
        .unwrap();

        assert_eq!(worker.finish().await, WorkerReport::default());
        assert_eq!(drain(&mut consumer).1, 1);
    }

    struct PanickingSynthesizer;

    impl Synthesizer for PanickingSynthesizer {
        fn synthesize(&self, _: &str, _: &str) -> Result<Vec<Vec<f32>>, SynthesisError> {
            panic!("engine crashed");
        }
    }

    #[tokio::test]
    async fn panic_in_synthesizer_still_ends_the_utterance() {
        let (producer, mut consumer) = playback_buffer(4);
        let worker =
            SynthesisWorker::spawn(Arc::new(PanickingSynthesizer), "v", producer).unwrap();

        worker.speak("Boom.");
        assert_eq!(worker.finish().await, WorkerReport::default());
        assert_eq!(drain(&mut consumer).1, 1);
    }

    #[tokio::test]
    async fn worker_blocks_on_full_buffer_until_drained() {
        let (producer, mut consumer) = playback_buffer(1);
        let synth = Arc::new(MockSynthesizer::new(vec![0.5; 2], 3));
        let worker = SynthesisWorker::spawn(synth, "v", producer).unwrap();
        worker.speak("Three chunks.");

        let drainer = std::thread::spawn(move || {
            let mut total = 0;
            let mut stopped = false;
            while !stopped {
                let (block, stop) = consumer.pull_exact(2);
                total += block.iter().filter(|&&s| s != 0.0).count();
                stopped = stop;
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            total
        });

        let report = worker.finish().await;
        assert_eq!(report.chunks, 3);
        assert_eq!(drainer.join().unwrap(), 6);
    }
}
