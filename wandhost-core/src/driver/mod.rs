//! The per-display-frame driver.
//!
//! [`FrameLoop`] is the whole runtime context of a running guest: the fixed-step clock, the
//! input sampler, the audio scheduler and the presenter. Frontends call
//! [`FrameLoop::run_frame`] once per display refresh with the current time, and it
//!
//! 1. asks the clock how many fixed steps are due,
//! 2. for each step samples input into the shared input region and calls the guest's step
//!    (only the last step of the frame draws),
//! 3. presents the frame,
//! 4. tops up the audio lead.
//!
//! Any error halts the loop for good; later frames fail with [`FrameError::Halted`].

use crate::audio::{AudioOutput, AudioScheduler};
use crate::bridge::{BridgeError, SharedMemory};
use crate::clock::FixedStepClock;
use crate::config::Config;
use crate::host::GuestFailure;
use crate::input::{InputDevices, InputSampler};
use crate::video::{PresentError, Presenter, RenderBackend};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuestError {
    /// The guest called `fail_`.
    #[error("guest failed: {0}")]
    Fatal(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// Any other trap (unreachable, out-of-bounds access, stack overflow, ...).
    #[error(transparent)]
    Trap(anyhow::Error),
}

impl GuestError {
    /// Classify an error returned by a guest call.
    pub fn from_trap(err: anyhow::Error) -> Self {
        if let Some(failure) = err.downcast_ref::<GuestFailure>() {
            return GuestError::Fatal(failure.message.clone());
        }
        if let Some(bridge) = err.downcast_ref::<BridgeError>() {
            return GuestError::Bridge(bridge.clone());
        }
        GuestError::Trap(err)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, GuestError::Fatal(_))
    }
}

/// A loaded guest, as seen by the frame loop.
pub trait Guest {
    /// Run one fixed simulation step.
    fn step(&mut self, skip_draw: bool) -> Result<(), GuestError>;

    /// Fill the shared audio chunk with the next 480 frames.
    fn synthesize_audio_chunk(&mut self) -> Result<(), GuestError>;

    /// Borrow the shared regions for the current memory generation.
    fn shared(&mut self) -> Result<SharedMemory<'_>, GuestError>;
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Guest(#[from] GuestError),
    #[error(transparent)]
    Present(#[from] PresentError),
    #[error("frame loop halted after an earlier error")]
    Halted,
}

impl From<BridgeError> for FrameError {
    fn from(err: BridgeError) -> Self {
        FrameError::Guest(GuestError::Bridge(err))
    }
}

/// What one display frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub steps: u32,
    pub audio_chunks: u32,
    /// Audio frames written ahead of playback after the top-up.
    pub audio_lead: u64,
}

pub struct FrameLoop {
    clock: FixedStepClock,
    sampler: InputSampler,
    scheduler: AudioScheduler,
    presenter: Presenter,
    halted: bool,
    frames: u64,
}

impl FrameLoop {
    pub fn new(config: &Config) -> Self {
        Self {
            clock: FixedStepClock::new(config.simulation.max_frame_delta_secs),
            sampler: InputSampler::new(config.input.thresholds()),
            scheduler: AudioScheduler::new(config.audio.lead_chunks),
            presenter: Presenter::new(),
            halted: false,
            frames: 0,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn scheduler(&self) -> &AudioScheduler {
        &self.scheduler
    }

    pub fn run_frame<G, B, O>(
        &mut self,
        now: Duration,
        guest: &mut G,
        devices: &InputDevices,
        backend: &mut B,
        output: &mut O,
    ) -> Result<FrameReport, FrameError>
    where
        G: Guest + ?Sized,
        B: RenderBackend + ?Sized,
        O: AudioOutput + ?Sized,
    {
        if self.halted {
            return Err(FrameError::Halted);
        }
        let result = self.frame(now, guest, devices, backend, output);
        match &result {
            Ok(report) => {
                self.frames += 1;
                log::trace!("frame {}: {report:?}", self.frames);
            }
            Err(err) => {
                log::error!("halting after frame {}: {err}", self.frames);
                self.halted = true;
            }
        }
        result
    }

    fn frame<G, B, O>(
        &mut self,
        now: Duration,
        guest: &mut G,
        devices: &InputDevices,
        backend: &mut B,
        output: &mut O,
    ) -> Result<FrameReport, FrameError>
    where
        G: Guest + ?Sized,
        B: RenderBackend + ?Sized,
        O: AudioOutput + ?Sized,
    {
        let steps = self.clock.advance(now);
        for i in 0..steps {
            let inputs = self.sampler.sample(devices);
            inputs.write_to(guest.shared()?.inputs_mut()?);
            guest.step(i + 1 < steps)?;
        }

        self.presenter.present(&mut guest.shared()?, backend)?;
        let audio_chunks = self.scheduler.top_up(guest, output)?;

        Ok(FrameReport {
            steps,
            audio_chunks,
            audio_lead: self.scheduler.state().lead(),
        })
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}


#[cfg(test)]
mod tests {
    use super::test_guest::MockGuest;
    use super::*;
    use crate::audio::tests::FakeOutput;
    use crate::audio::DEFAULT_RING_FRAMES;
    use crate::input::{Button, Key};
    use crate::video::SoftwareRenderer;

    const FRAME_60HZ: Duration = Duration::from_nanos(16_666_667);

    struct Harness {
        frame_loop: FrameLoop,
        guest: MockGuest,
        renderer: SoftwareRenderer,
        output: FakeOutput,
        devices: InputDevices,
        now: Duration,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                frame_loop: FrameLoop::default(),
                guest: MockGuest::new(),
                renderer: SoftwareRenderer::new(),
                output: FakeOutput::new(DEFAULT_RING_FRAMES),
                devices: InputDevices::default(),
                now: Duration::ZERO,
            }
        }

        fn frame(&mut self) -> Result<FrameReport, FrameError> {
            let report = self.frame_loop.run_frame(
                self.now,
                &mut self.guest,
                &self.devices,
                &mut self.renderer,
                &mut self.output,
            );
            self.now += FRAME_60HZ;
            self.output.played += 800;
            report
        }
    }

    #[test]
    fn first_frame_presents_without_stepping() {
        let mut h = Harness::new();
        let report = h.frame().unwrap();
        assert_eq!(report.steps, 0);
        assert_eq!(report.audio_chunks, 7);
        assert!(h.guest.steps.is_empty());
        assert_eq!(h.renderer.draws(), 1);
    }

    #[test]
    fn only_the_last_step_of_a_frame_draws() {
        let mut h = Harness::new();
        h.frame().unwrap();
        let report = h.frame().unwrap();
        assert_eq!(report.steps, 8);
        assert_eq!(
            h.guest.steps,
            vec![true, true, true, true, true, true, true, false]
        );
    }

    #[test]
    fn sixty_hz_runs_64_steps_in_8_frames() {
        let mut h = Harness::new();
        h.frame().unwrap();
        for _ in 0..8 {
            let report = h.frame().unwrap();
            assert!(report.steps <= 16);
            let lead = report.audio_lead;
            let window = h.frame_loop.scheduler().lead_window();
            assert!(lead > window && lead <= window + 480);
        }
        assert_eq!(h.guest.steps.len(), 64);
        assert_eq!(h.renderer.draws(), 9);
    }

    #[test]
    fn inputs_are_written_before_each_step() {
        let mut h = Harness::new();
        h.frame().unwrap();
        h.devices.keyboard.set(Key::Right, true);
        h.frame().unwrap();

        let right = Button::MenuRight.index();
        let avatar = Button::AvatarRight.index();
        for seen in &h.guest.inputs_seen {
            assert_eq!(seen[right], 1);
            assert_eq!(seen[avatar], 1);
            assert_eq!(seen.iter().map(|b| *b as u32).sum::<u32>(), 2);
        }
    }

    #[test]
    fn fatal_step_halts_the_loop() {
        let mut h = Harness::new();
        h.guest.fail_step_at = Some(3);
        h.frame().unwrap();

        let err = h.frame().unwrap_err();
        assert!(matches!(err, FrameError::Guest(GuestError::Fatal(_))));
        assert!(h.frame_loop.is_halted());
        assert_eq!(h.guest.steps.len(), 3);

        assert!(matches!(h.frame(), Err(FrameError::Halted)));
        assert_eq!(h.guest.steps.len(), 3);
        assert_eq!(h.renderer.draws(), 1);
    }

    #[test]
    fn memory_growth_between_steps_is_transparent() {
        let mut h = Harness::new();
        h.guest.grow_every_step = true;
        h.frame().unwrap();
        h.devices.keyboard.set(Key::Escape, true);
        h.frame().unwrap();

        assert_eq!(h.guest.bridge.generation(), 8);
        assert_eq!(h.guest.inputs_seen.last().unwrap()[Button::Pause.index()], 1);
        // Palette entry 0 is red and the last step drew index 8 at pixel 0.
        let bottom = crate::abi::PIXEL_BUFFER_H - 1;
        assert_eq!(h.renderer.pixel(0, bottom), 0);
        assert_eq!(h.renderer.pixel(1, bottom), 0x00FF_0000);
    }
}
