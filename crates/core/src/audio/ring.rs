use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Stereo frames per ring slot.
pub const PERIOD_FRAMES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRingConfig {
    /// Number of periods in the ring.
    pub periods: usize,
    /// Frames the consumer tries to keep buffered between calls.
    pub target_latency_frames: usize,
}

impl Default for AudioRingConfig {
    fn default() -> Self {
        Self {
            periods: 44100,
            target_latency_frames: 2000,
        }
    }
}

struct Period {
    samples: [i16; PERIOD_FRAMES * 2],
    /// Frames written so far; only meaningful for the slot being written.
    write_pos: usize,
}

impl Period {
    fn new() -> Self {
        Self {
            samples: [0; PERIOD_FRAMES * 2],
            write_pos: 0,
        }
    }
}

struct ReadCursor {
    index: usize,
    sub: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fixed-size ring of audio periods shared by one producer and one consumer.
///
/// The producer fills the slot at the write index and publishes it by
/// advancing the index. The consumer only reads slots strictly behind the
/// write index, so the slot being written is never observed half-filled.
/// The write index mutex is only held to read or advance the index.
pub struct AudioRing {
    config: AudioRingConfig,
    slots: Vec<Mutex<Period>>,
    write_index: Mutex<usize>,
    read: Mutex<ReadCursor>,
}

impl AudioRing {
    pub fn new(config: AudioRingConfig) -> Self {
        let periods = config.periods.max(2);
        Self {
            config: AudioRingConfig { periods, ..config },
            slots: (0..periods).map(|_| Mutex::new(Period::new())).collect(),
            write_index: Mutex::new(0),
            read: Mutex::new(ReadCursor { index: 0, sub: 0 }),
        }
    }

    pub fn config(&self) -> &AudioRingConfig {
        &self.config
    }

    /// Append interleaved stereo samples. A trailing odd sample is ignored.
    pub fn send_audio_data(&self, samples: &[i16]) {
        let n = self.slots.len();
        let mut w = *lock(&self.write_index);
        let mut slot = lock(&self.slots[w]);

        for frame in samples.chunks_exact(2) {
            let p = slot.write_pos * 2;
            slot.samples[p] = frame[0];
            slot.samples[p + 1] = frame[1];
            slot.write_pos += 1;

            if slot.write_pos >= PERIOD_FRAMES {
                slot.write_pos = 0;
                drop(slot);
                w = (w + 1) % n;
                *lock(&self.write_index) = w;
                slot = lock(&self.slots[w]);
            }
        }
    }

    /// Frames that a call to [`forward_audio_data`](Self::forward_audio_data)
    /// could deliver right now.
    pub fn available_frames(&self) -> usize {
        let read = lock(&self.read);
        self.available_from(&read)
    }

    fn available_from(&self, read: &ReadCursor) -> usize {
        let n = self.slots.len();
        let w = *lock(&self.write_index);
        let r = read.index;

        let full_periods = if r < w {
            w - r - 1
        } else if r > w {
            w + n - r - 1
        } else {
            // no finished period: partial data is not delivered
            return 0;
        };

        (PERIOD_FRAMES - read.sub) + full_periods * PERIOD_FRAMES
    }

    /// Copy an adaptively sized batch of frames into `out` and return the
    /// number of frames written.
    ///
    /// The batch size is `expected + (available - expected - latency) / 10`,
    /// clamped to what is available and to the capacity of `out`.
    pub fn forward_audio_data(&self, out: &mut [i16], expected_frames: usize) -> usize {
        let mut read = lock(&self.read);
        let available = self.available_from(&read) as i64;

        let expected = expected_frames as i64;
        let latency = self.config.target_latency_frames as i64;
        let frames = (expected + (available - expected - latency) / 10)
            .clamp(0, available)
            .min((out.len() / 2) as i64) as usize;

        let n = self.slots.len();
        let mut copied = 0;
        while copied < frames {
            let slot = lock(&self.slots[read.index]);
            let count = (PERIOD_FRAMES - read.sub).min(frames - copied);
            let src = &slot.samples[read.sub * 2..(read.sub + count) * 2];
            out[copied * 2..(copied + count) * 2].copy_from_slice(src);
            drop(slot);

            copied += count;
            read.sub += count;
            if read.sub >= PERIOD_FRAMES {
                read.sub = 0;
                read.index = (read.index + 1) % n;
            }
        }

        copied
    }
}

impl crate::AudioSink for std::sync::Arc<AudioRing> {
    fn send_audio_data(&mut self, samples: &[i16]) {
        AudioRing::send_audio_data(self, samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(periods: usize, latency: usize) -> AudioRing {
        AudioRing::new(AudioRingConfig {
            periods,
            target_latency_frames: latency,
        })
    }

    fn frames(start: i16, count: usize) -> Vec<i16> {
        (0..count as i16)
            .flat_map(|i| [start + i, -(start + i)])
            .collect()
    }

    #[test]
    fn test_partial_period_is_not_available() {
        let r = ring(8, 0);
        r.send_audio_data(&frames(0, PERIOD_FRAMES - 1));
        assert_eq!(r.available_frames(), 0);
        let mut out = [0i16; 256];
        assert_eq!(r.forward_audio_data(&mut out, 100), 0);
    }

    #[test]
    fn test_in_progress_period_is_never_read() {
        let r = ring(8, 0);
        r.send_audio_data(&frames(1, PERIOD_FRAMES + 4));
        assert_eq!(r.available_frames(), PERIOD_FRAMES);

        let mut out = [0i16; 256];
        let n = r.forward_audio_data(&mut out, 100);
        assert_eq!(n, PERIOD_FRAMES);
        assert_eq!(&out[..4], &[1, -1, 2, -2]);
        assert_eq!(out[(PERIOD_FRAMES - 1) * 2], PERIOD_FRAMES as i16);
        assert_eq!(r.available_frames(), 0);
    }

    #[test]
    fn test_read_resumes_mid_period() {
        let r = ring(8, 0);
        r.send_audio_data(&frames(1, PERIOD_FRAMES * 3));
        // three finished periods: 10 + (48 - 10) / 10 = 13
        let mut out = [0i16; 64];
        assert_eq!(r.forward_audio_data(&mut out, 10), 13);
        assert_eq!(out[0], 1);
        assert_eq!(r.available_frames(), PERIOD_FRAMES * 3 - 13);

        let n = r.forward_audio_data(&mut out, 10);
        assert_eq!(n, 12);
        assert_eq!(out[0], 14);
        assert_eq!(r.available_frames(), PERIOD_FRAMES * 3 - 13 - n);
    }

    #[test]
    fn test_never_returns_more_than_available_or_fits() {
        let r = ring(64, 0);
        r.send_audio_data(&frames(0, PERIOD_FRAMES * 10));
        let available = r.available_frames();
        let mut big = vec![0i16; 4096];
        assert!(r.forward_audio_data(&mut big, 5000) <= available);

        r.send_audio_data(&frames(0, PERIOD_FRAMES * 10));
        let mut small = [0i16; 20];
        assert_eq!(r.forward_audio_data(&mut small, 5000), 10);
    }

    #[test]
    fn test_large_latency_target_holds_back_data() {
        let r = ring(64, 2000);
        r.send_audio_data(&frames(0, PERIOD_FRAMES * 20));
        let mut out = vec![0i16; 4096];
        // 100 + (320 - 100 - 2000) / 10 is negative
        assert_eq!(r.forward_audio_data(&mut out, 100), 0);
    }

    #[test]
    fn test_write_index_wraps() {
        let r = ring(4, 0);
        let mut out = [0i16; 2 * PERIOD_FRAMES * 4];
        for round in 0..6 {
            r.send_audio_data(&frames(round * 100, PERIOD_FRAMES * 2));
            let n = r.forward_audio_data(&mut out, PERIOD_FRAMES * 2);
            assert!(n > 0, "round {round} returned no frames");
        }
    }

    #[test]
    fn test_available_converges_toward_latency_target() {
        let r = ring(2048, 2000);
        let input = 900;
        let expected = 882;
        let mut out = vec![0i16; 8192];
        let mut history = Vec::new();

        for step in 0..400 {
            r.send_audio_data(&frames((step % 100) as i16, input));
            let before = r.available_frames();
            let sent = r.forward_audio_data(&mut out, expected);
            assert!(sent <= before);
            history.push(before as i64);
        }

        // equilibrium: latency + expected + 10 * (input - expected)
        let target = 2000 + expected as i64 + 10 * (input as i64 - expected as i64);
        let first_error = (history[0] - target).abs();
        for &a in &history[350..] {
            let error = (a - target).abs();
            assert!(error < 200, "available {a} too far from {target}");
            assert!(error < first_error);
        }
    }
}
