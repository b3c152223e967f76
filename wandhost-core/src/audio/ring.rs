//! Lock-free stereo sample ring shared between the frame loop and the playback thread.
//!
//! Positions are monotonically increasing `u64` frame counters. The producer writes slots at
//! `position % capacity` and then publishes its write cursor with `Release`; the consumer loads
//! it with `Acquire` before reading any slot. The consumer never blocks: past the published
//! cursor it plays silence and counts the missing frames as underruns, but the playback clock
//! keeps moving exactly like a hardware device would.
//!
//! Samples are stored as `f32` bit patterns in `AtomicU32`, one buffer per channel.

use super::AudioOutput;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

struct Shared {
    channels: [Box<[AtomicU32]>; 2],
    read_pos: AtomicU64,
    write_limit: AtomicU64,
    underrun_frames: AtomicU64,
    paused: AtomicBool,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.channels[0].len()
    }
}

/// Constructor for the producer/consumer pair.
pub struct AudioRing;

impl AudioRing {
    /// Create a ring holding `capacity` stereo frames. The consumer starts paused.
    pub fn new(capacity: usize) -> (RingProducer, RingConsumer) {
        let capacity = capacity.max(1);
        let channel = || -> Box<[AtomicU32]> {
            (0..capacity).map(|_| AtomicU32::new(0.0f32.to_bits())).collect()
        };
        let shared = Arc::new(Shared {
            channels: [channel(), channel()],
            read_pos: AtomicU64::new(0),
            write_limit: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            paused: AtomicBool::new(true),
        });
        (
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }
}

/// Frame-loop side. Implements [`AudioOutput`] for the scheduler.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Frames rendered as silence because no data was published in time.
    pub fn underrun_frames(&self) -> u64 {
        self.shared.underrun_frames.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }
}

impl AudioOutput for RingProducer {
    fn played_samples(&self) -> u64 {
        self.shared.read_pos.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    fn write_frame(&mut self, slot: usize, left: f32, right: f32) {
        let [l, r] = &self.shared.channels;
        l[slot].store(left.to_bits(), Ordering::Relaxed);
        r[slot].store(right.to_bits(), Ordering::Relaxed);
    }

    fn publish(&mut self, samples_output: u64) {
        self.shared
            .write_limit
            .store(samples_output, Ordering::Release);
    }
}

/// Playback side. Lives on the audio callback thread (or in the libretro `on_run`).
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    pub fn played_samples(&self) -> u64 {
        self.shared.read_pos.load(Ordering::Relaxed)
    }

    /// Fill `out` with interleaved `L,R` frames and advance the playback clock by
    /// `out.len() / 2` frames. While paused, writes silence and leaves the clock alone.
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        self.drain(frames, |i, left, right| {
            out[2 * i] = left;
            out[2 * i + 1] = right;
        });
    }

    /// Render `frames` frames as interleaved signed 16-bit samples, replacing the contents of
    /// `out`. Reuses its allocation.
    pub fn render_i16(&mut self, frames: usize, out: &mut Vec<i16>) {
        out.clear();
        out.reserve(frames * 2);
        self.drain(frames, |_, left, right| {
            out.extend([to_i16(left), to_i16(right)]);
        });
    }

    /// Hand `frames` frames to `emit` in order, then advance the playback clock.
    fn drain(&mut self, frames: usize, mut emit: impl FnMut(usize, f32, f32)) {
        if self.is_paused() {
            (0..frames).for_each(|i| emit(i, 0.0, 0.0));
            return;
        }

        let shared = &*self.shared;
        let capacity = shared.capacity() as u64;
        let start = shared.read_pos.load(Ordering::Relaxed);
        let limit = shared.write_limit.load(Ordering::Acquire);
        let [l, r] = &shared.channels;

        let mut missing = 0u64;
        for i in 0..frames {
            let pos = start + i as u64;
            if pos < limit {
                let slot = (pos % capacity) as usize;
                emit(
                    i,
                    f32::from_bits(l[slot].load(Ordering::Relaxed)),
                    f32::from_bits(r[slot].load(Ordering::Relaxed)),
                );
            } else {
                emit(i, 0.0, 0.0);
                missing += 1;
            }
        }

        if missing > 0 {
            shared.underrun_frames.fetch_add(missing, Ordering::Relaxed);
        }
        shared.read_pos.store(start + frames as u64, Ordering::Release);
    }
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}
