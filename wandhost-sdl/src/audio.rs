use sdl2::AudioSubsystem;
use sdl2::audio::{AudioCallback, AudioDevice, AudioSpecDesired};
use wandhost_core::abi::{SOUND_CHANNELS, SOUND_SAMPLES_PER_SECOND};
use wandhost_core::audio::RingConsumer;

/// Device buffer in frames (~21 ms at 48 kHz).
const DEVICE_FRAMES: u16 = 1024;

/// SDL audio thread side: drains the ring.
pub struct RingPlayback {
    consumer: RingConsumer,
}

impl AudioCallback for RingPlayback {
    type Channel = f32;

    fn callback(&mut self, out: &mut [f32]) {
        self.consumer.render(out);
    }
}

/// The playback device. Opened paused; [`Speaker::resume`] starts it.
pub struct Speaker {
    device: AudioDevice<RingPlayback>,
    started: bool,
}

impl Speaker {
    pub fn open(audio: &AudioSubsystem, consumer: RingConsumer) -> anyhow::Result<Self> {
        let desired = AudioSpecDesired {
            freq: Some(SOUND_SAMPLES_PER_SECOND as i32),
            channels: Some(SOUND_CHANNELS as u8),
            samples: Some(DEVICE_FRAMES),
        };

        let device = audio
            .open_playback(None, &desired, |obtained| {
                log::debug!(
                    "audio device: {} Hz, {} channels, {} frame buffer",
                    obtained.freq,
                    obtained.channels,
                    obtained.samples
                );
                RingPlayback { consumer }
            })
            .map_err(|err| anyhow::anyhow!("failed to open audio device: {err}"))?;

        Ok(Self {
            device,
            started: false,
        })
    }

    /// Start playback. Only the first call has an effect.
    pub fn resume(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.device.lock().consumer.set_paused(false);
        self.device.resume();
        log::info!("audio started");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}
