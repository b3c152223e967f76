//! Audio streaming scheduler.
//!
//! The guest synthesizes audio one fixed chunk at a time. Once per display frame the scheduler
//! compares how far playback has got (`samples_played`) with how far it has written
//! (`samples_output`) and calls the guest's synthesis export until it is more than
//! `lead_window` frames ahead. Each chunk is de-interleaved into the platform ring.

pub mod ring;

use crate::abi::SOUND_SAMPLES_PER_CHUNK;
use crate::driver::{Guest, GuestError};

pub use ring::{AudioRing, RingConsumer, RingProducer};

/// Chunks kept ahead of the playback cursor by default.
pub const DEFAULT_LEAD_CHUNKS: u32 = 6;

/// Default ring size: one second at 48 kHz.
pub const DEFAULT_RING_FRAMES: usize = 48_000;

const CHUNK: u64 = SOUND_SAMPLES_PER_CHUNK as u64;

/// Where samples go. Implemented by [`RingProducer`]; tests use in-memory fakes.
pub trait AudioOutput {
    /// Frames consumed by playback so far.
    fn played_samples(&self) -> u64;

    /// Ring size in frames.
    fn capacity(&self) -> usize;

    /// Store one stereo frame at ring slot `slot` (already reduced modulo capacity).
    fn write_frame(&mut self, slot: usize, left: f32, right: f32);

    /// Make every frame before `samples_output` visible to playback.
    fn publish(&mut self, samples_output: u64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioClockState {
    pub samples_played: u64,
    pub samples_output: u64,
}

impl AudioClockState {
    /// Frames written but not yet played.
    pub fn lead(&self) -> u64 {
        self.samples_output.saturating_sub(self.samples_played)
    }
}

#[derive(Debug, Clone)]
pub struct AudioScheduler {
    state: AudioClockState,
    lead_window: u64,
    stalls: u64,
}

impl AudioScheduler {
    pub fn new(lead_chunks: u32) -> Self {
        Self {
            state: AudioClockState::default(),
            lead_window: u64::from(lead_chunks) * CHUNK,
            stalls: 0,
        }
    }

    pub fn state(&self) -> AudioClockState {
        self.state
    }

    pub fn lead_window(&self) -> u64 {
        self.lead_window
    }

    /// Smallest ring that can hold the lead plus the chunk in flight on either side.
    pub fn min_ring_frames(lead_chunks: u32) -> usize {
        (lead_chunks as usize + 2) * SOUND_SAMPLES_PER_CHUNK + 1
    }

    /// Number of playback stalls recovered from so far.
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    /// Synthesize chunks until the lead exceeds the window. Returns the number of chunks made.
    pub fn top_up<G, O>(&mut self, guest: &mut G, output: &mut O) -> Result<u32, GuestError>
    where
        G: Guest + ?Sized,
        O: AudioOutput + ?Sized,
    {
        let played = output.played_samples();
        self.state.samples_played = played;

        if played > self.state.samples_output {
            let missed = played - self.state.samples_output;
            if self.stalls == 0 {
                log::warn!("audio underrun: playback ran {missed} frames past written audio");
            } else {
                log::debug!("audio underrun of {missed} frames");
            }
            self.stalls += 1;
            self.state.samples_output = played;
        }

        let capacity = output.capacity() as u64;
        let mut chunks = 0;
        while self.state.samples_output <= played + self.lead_window {
            guest.synthesize_audio_chunk()?;
            {
                let mut shared = guest.shared()?;
                let chunk = shared.sound_chunk()?;
                for (i, (left, right)) in chunk.iter().enumerate() {
                    let slot = (self.state.samples_output + i as u64) % capacity;
                    output.write_frame(slot as usize, left, right);
                }
            }
            self.state.samples_output += CHUNK;
            chunks += 1;
        }

        output.publish(self.state.samples_output);
        log::trace!(
            "audio: {chunks} chunks, lead {} frames",
            self.state.lead()
        );
        Ok(chunks)
    }
}

impl Default for AudioScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_LEAD_CHUNKS)
    }
}
