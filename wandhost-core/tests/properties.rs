use std::time::Duration;

use proptest::prelude::*;

use wandhost_core::abi::{SIM_STEPS_PER_SECOND, SOUND_SAMPLES_PER_CHUNK, layout};
use wandhost_core::audio::{AudioOutput, AudioScheduler};
use wandhost_core::bridge::{MemoryBridge, SharedMemory, SharedRegions};
use wandhost_core::clock::{DEFAULT_MAX_FRAME_DELTA_SECS, FixedStepClock};
use wandhost_core::driver::{Guest, GuestError};

const NANOS_PER_SEC: u128 = 1_000_000_000;
/// One clamped frame: 1/30 s at 480 Hz.
const MAX_STEPS_PER_FRAME: u32 = 16;

/// Guest with a silent sound chunk; only the scheduler's bookkeeping is under test.
struct SilentGuest {
    bridge: MemoryBridge,
    memory: Vec<u8>,
}

impl SilentGuest {
    fn new() -> Self {
        let regions = SharedRegions {
            palette: 0,
            pixels: layout::PALETTE_BYTES as u32,
            inputs: (layout::PALETTE_BYTES + layout::PIXELS_BYTES) as u32,
            sound_chunk: (layout::PALETTE_BYTES + layout::PIXELS_BYTES + 16) as u32,
        };
        let memory = vec![0; regions.sound_chunk as usize + layout::SOUND_CHUNK_BYTES];
        let mut bridge = MemoryBridge::new();
        bridge.register(regions, memory.len()).unwrap();
        Self { bridge, memory }
    }
}

impl Guest for SilentGuest {
    fn step(&mut self, _skip_draw: bool) -> Result<(), GuestError> {
        Ok(())
    }

    fn synthesize_audio_chunk(&mut self) -> Result<(), GuestError> {
        Ok(())
    }

    fn shared(&mut self) -> Result<SharedMemory<'_>, GuestError> {
        Ok(SharedMemory::new(&mut self.bridge, &mut self.memory))
    }
}

struct CountingOutput {
    played: u64,
    published: u64,
}

impl AudioOutput for CountingOutput {
    fn played_samples(&self) -> u64 {
        self.played
    }

    fn capacity(&self) -> usize {
        AudioScheduler::min_ring_frames(6)
    }

    fn write_frame(&mut self, slot: usize, _left: f32, _right: f32) {
        assert!(slot < self.capacity());
    }

    fn publish(&mut self, samples_output: u64) {
        assert!(samples_output >= self.published);
        self.published = samples_output;
    }
}

proptest! {
    #[test]
    fn unclamped_steps_sum_to_elapsed_time(deltas in prop::collection::vec(0u64..=33_333_333, 1..200)) {
        let mut clock = FixedStepClock::new(DEFAULT_MAX_FRAME_DELTA_SECS);
        let mut now = Duration::ZERO;
        prop_assert_eq!(clock.advance(now), 0);

        let mut steps = 0u128;
        let mut total = 0u128;
        for nanos in deltas {
            now += Duration::from_nanos(nanos);
            let frame = clock.advance(now);
            prop_assert!(frame <= MAX_STEPS_PER_FRAME);
            steps += u128::from(frame);
            total += u128::from(nanos);
        }

        let units = total * u128::from(SIM_STEPS_PER_SECOND);
        prop_assert_eq!(steps, units / NANOS_PER_SEC);
        prop_assert!(clock.carried() <= clock.step_duration());
    }

    #[test]
    fn long_stalls_never_exceed_the_clamp(stalls in prop::collection::vec(0u64..10_000_000_000, 1..50)) {
        let mut clock = FixedStepClock::new(DEFAULT_MAX_FRAME_DELTA_SECS);
        let mut now = Duration::ZERO;
        clock.advance(now);
        for nanos in stalls {
            now += Duration::from_nanos(nanos);
            prop_assert!(clock.advance(now) <= MAX_STEPS_PER_FRAME);
        }
    }

    #[test]
    fn lead_stays_within_one_chunk_of_the_window(increments in prop::collection::vec(0u64..6_000, 1..100)) {
        let mut scheduler = AudioScheduler::new(6);
        let mut guest = SilentGuest::new();
        let mut output = CountingOutput { played: 0, published: 0 };
        let window = scheduler.lead_window();
        let chunk = SOUND_SAMPLES_PER_CHUNK as u64;

        for played in increments {
            output.played += played;
            scheduler.top_up(&mut guest, &mut output).unwrap();

            let state = scheduler.state();
            prop_assert_eq!(state.samples_played, output.played);
            prop_assert_eq!(output.published, state.samples_output);
            prop_assert!(state.lead() > window);
            prop_assert!(state.lead() <= window + chunk);
        }
    }
}
