//! wandhost-core: host runtime for fixed-rate WebAssembly games.
//!
//! A guest module keeps its palette, indexed pixel buffer, input vector and audio chunk in its
//! own linear memory and tells the host where they are (see [`abi`]). The host:
//!
//! - steps the guest at a fixed 480 Hz regardless of display rate ([`clock`], [`driver`]),
//! - feeds it merged keyboard/gamepad input ([`input`]),
//! - presents its frame through a palette lookup ([`video`]),
//! - keeps a lead of synthesized audio ahead of playback ([`audio`]),
//!
//! all through views that survive guest memory growth ([`bridge`]).
//!
//! The crate is also a libretro core: built as a `cdylib` it exports the libretro API and
//! runs `.wasm`/`.wat` guests with the CPU renderer.

pub mod abi;
pub mod audio;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod driver;
pub mod host;
pub mod input;
pub mod loader;
pub mod runtime;
pub mod state;
pub mod video;

use crate::abi::{PIXEL_BUFFER_H, PIXEL_BUFFER_W, SOUND_SAMPLES_PER_SECOND};
use crate::audio::{AudioRing, RingConsumer, RingProducer};
use crate::clock::{FixedRateClock, TimeSource};
use crate::config::Config;
use crate::driver::{FrameError, FrameLoop};
use crate::host::{HostRequest, StandardServices};
use crate::input::{GamepadState, InputDevices};
use crate::runtime::WasmGuest;
use crate::video::SoftwareRenderer;

use libretro_backend::{
    AudioVideoInfo, Core, CoreInfo, GameData, JoypadButton, LoadGameResult, PixelFormat,
    RuntimeHandle, libretro_core,
};
use std::sync::mpsc::Receiver;

/// Display rate declared to libretro frontends.
const LIBRETRO_FPS: u32 = 60;

/// Audio frames handed to the frontend per `on_run`.
const FRAMES_PER_RUN: usize = (SOUND_SAMPLES_PER_SECOND / LIBRETRO_FPS) as usize;

/// libretro joypad buttons and their index in the standard gamepad layout.
const JOYPAD_LAYOUT: [(JoypadButton, usize); 16] = [
    (JoypadButton::B, input::pad::SOUTH),
    (JoypadButton::A, 1),
    (JoypadButton::Y, input::pad::WEST),
    (JoypadButton::X, 3),
    (JoypadButton::L1, 4),
    (JoypadButton::R1, 5),
    (JoypadButton::L2, 6),
    (JoypadButton::R2, 7),
    (JoypadButton::Select, input::pad::SELECT),
    (JoypadButton::Start, input::pad::START),
    (JoypadButton::L3, 10),
    (JoypadButton::R3, 11),
    (JoypadButton::Up, input::pad::DPAD_UP),
    (JoypadButton::Down, input::pad::DPAD_DOWN),
    (JoypadButton::Left, input::pad::DPAD_LEFT),
    (JoypadButton::Right, input::pad::DPAD_RIGHT),
];

fn poll_joypad(handle: &mut RuntimeHandle, port: u32, pad: &mut GamepadState) {
    for (button, index) in JOYPAD_LAYOUT {
        pad.buttons[index] = handle.is_joypad_button_pressed(port, button);
    }
}

/// Everything that exists while a game is loaded.
struct Session {
    game_data: GameData,
    guest: WasmGuest,
    frame_loop: FrameLoop,
    renderer: SoftwareRenderer,
    producer: RingProducer,
    consumer: RingConsumer,
    clock: FixedRateClock,
    devices: InputDevices,
    requests: Receiver<HostRequest>,
    audio_out: Vec<i16>,
}

impl Session {
    fn run(&mut self, handle: &mut RuntimeHandle) {
        poll_joypad(handle, 0, &mut self.devices.gamepads[0]);

        let now = self.clock.now();
        let result = self.frame_loop.run_frame(
            now,
            &mut self.guest,
            &self.devices,
            &mut self.renderer,
            &mut self.producer,
        );
        // After a halt the last frame stays up and audio runs dry.
        if let Err(err) = result
            && !matches!(err, FrameError::Halted)
        {
            log::warn!("guest halted ({err}), presenting the last frame from now on");
        }

        for request in self.requests.try_iter() {
            match request {
                HostRequest::OpenUrl(url) => {
                    log::info!("libretro frontends cannot open urls, ignoring {url}");
                }
                HostRequest::Fullscreen(on) => {
                    log::debug!("fullscreen request ({on}) left to the frontend");
                }
                HostRequest::Fatal(message) => {
                    log::error!("guest stopped: {message}");
                }
            }
        }

        handle.upload_video_frame(&self.renderer.frame_bytes());
        self.consumer.render_i16(FRAMES_PER_RUN, &mut self.audio_out);
        handle.upload_audio_frame(&self.audio_out);
    }
}

/// The libretro core instance.
#[derive(Default)]
pub struct WandhostCore {
    session: Option<Session>,
}

impl WandhostCore {
    fn start(game_data: &GameData, config: &Config) -> Result<Loaded, String> {
        let bytes = game_data.data().ok_or("game has no data")?;
        let (services, requests) = StandardServices::new();
        let guest = runtime::launch(bytes, &config.runtime, Box::new(services))
            .map_err(|err| err.to_string())?;
        Ok(Loaded { guest, requests })
    }
}

struct Loaded {
    guest: WasmGuest,
    requests: Receiver<HostRequest>,
}

impl Core for WandhostCore {
    fn save_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn rtc_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn system_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn video_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn info() -> CoreInfo {
        CoreInfo::new("wandhost", env!("CARGO_PKG_VERSION"))
            .supports_roms_with_extension("wasm")
            .supports_roms_with_extension("wat")
    }

    fn on_load_game(&mut self, game_data: GameData) -> LoadGameResult {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();

        let config = Config::default();
        let Loaded { guest, requests } = match Self::start(&game_data, &config) {
            Ok(loaded) => loaded,
            Err(err) => {
                log::error!("failed to load guest: {err}");
                return LoadGameResult::Failed(game_data);
            }
        };

        let (producer, consumer) = AudioRing::new(config.audio.ring_frames);
        // The frontend owns playback, so there is no user-gesture gate here.
        consumer.set_paused(false);

        self.session = Some(Session {
            game_data,
            guest,
            frame_loop: FrameLoop::new(&config),
            renderer: SoftwareRenderer::new(),
            producer,
            consumer,
            clock: FixedRateClock::new(LIBRETRO_FPS),
            devices: InputDevices {
                keyboard: Default::default(),
                gamepads: vec![GamepadState::standard()],
            },
            requests,
            audio_out: Vec::with_capacity(FRAMES_PER_RUN * 2),
        });

        LoadGameResult::Success(
            AudioVideoInfo::new()
                .video(
                    PIXEL_BUFFER_W as u32,
                    PIXEL_BUFFER_H as u32,
                    f64::from(LIBRETRO_FPS),
                    PixelFormat::ARGB8888,
                )
                .audio(f64::from(SOUND_SAMPLES_PER_SECOND)),
        )
    }

    fn on_unload_game(&mut self) -> GameData {
        let session = self
            .session
            .take()
            .expect("libretro unloads only after a successful load");
        log::info!("unloading guest after {} frames", session.frame_loop.frames());
        session.game_data
    }

    fn on_run(&mut self, handle: &mut RuntimeHandle) {
        if let Some(session) = self.session.as_mut() {
            session.run(handle);
        }
    }

    fn on_reset(&mut self) {
        // Guests have no reset entry point; start over from a fresh instance.
        let Some(session) = self.session.take() else {
            return;
        };
        let config = Config::default();
        match Self::start(&session.game_data, &config) {
            Ok(Loaded { guest, requests }) => {
                let (producer, consumer) = AudioRing::new(config.audio.ring_frames);
                consumer.set_paused(false);
                self.session = Some(Session {
                    guest,
                    requests,
                    producer,
                    consumer,
                    frame_loop: FrameLoop::new(&config),
                    clock: FixedRateClock::new(LIBRETRO_FPS),
                    ..session
                });
            }
            Err(err) => {
                log::error!("reset failed, keeping the running guest: {err}");
                self.session = Some(session);
            }
        }
    }
}

libretro_core!(WandhostCore);
