use anyhow::Context;
use sdl2::event::Event;
use sdl2::messagebox::{MessageBoxFlag, show_simple_message_box};
use wandhost_core::audio::AudioRing;
use wandhost_core::clock::{SystemClock, TimeSource};
use wandhost_core::config::Config;
use wandhost_core::driver::{FrameError, FrameLoop};
use wandhost_core::host::{HostRequest, StandardServices};
use wandhost_core::input::InputDevices;
use wandhost_core::runtime;

use crate::audio::Speaker;
use crate::input::{self, Gamepads};
use crate::video::Display;

/// Run `guest_bytes` until the window closes or the guest fails.
pub fn run(guest_bytes: &[u8], config: &Config, title: &str) -> anyhow::Result<()> {
    let sdl = sdl2::init().map_err(anyhow::Error::msg)?;
    let video = sdl.video().map_err(anyhow::Error::msg)?;
    let audio = sdl.audio().map_err(anyhow::Error::msg)?;
    let controllers = sdl.game_controller().map_err(anyhow::Error::msg)?;

    let mut display = Display::new(&video, title, config.video.scale, config.video.vsync)
        .context("failed to set up OpenGL presentation")?;

    let (services, requests) = StandardServices::new();
    let mut guest = runtime::launch(guest_bytes, &config.runtime, Box::new(services))?;

    let (mut producer, consumer) = AudioRing::new(config.audio.ring_frames);
    let mut speaker = Speaker::open(&audio, consumer)?;
    if config.audio.autoplay {
        speaker.resume();
    } else {
        log::info!("audio starts on the first key press, button press or click");
    }

    let mut gamepads = Gamepads::new(controllers);
    let mut devices = InputDevices::default();
    let mut frame_loop = FrameLoop::new(config);
    let mut clock = SystemClock::new();
    let mut event_pump = sdl.event_pump().map_err(anyhow::Error::msg)?;

    'main: loop {
        for event in event_pump.poll_iter() {
            if !speaker.is_started() && input::is_user_gesture(&event) {
                speaker.resume();
            }
            if let Event::Quit { .. } = event {
                break 'main;
            }
            if !input::apply_key_event(&event, &mut devices.keyboard) {
                gamepads.handle_event(&event);
            }
        }
        gamepads.snapshot(&mut devices.gamepads);
        display.sync_drawable_size();

        let result = frame_loop.run_frame(
            clock.now(),
            &mut guest,
            &devices,
            &mut display.renderer,
            &mut producer,
        );

        for request in requests.try_iter() {
            match request {
                HostRequest::OpenUrl(url) => {
                    if let Err(err) = sdl2::url::open_url(&url) {
                        log::warn!("could not open {url}: {err}");
                    }
                }
                HostRequest::Fullscreen(on) => display.set_fullscreen(on),
                HostRequest::Fatal(message) => {
                    if let Err(err) = show_simple_message_box(
                        MessageBoxFlag::ERROR,
                        title,
                        &message,
                        display.window(),
                    ) {
                        log::warn!("could not show error dialog: {err}");
                    }
                    break 'main;
                }
            }
        }

        match result {
            Ok(_) => display.swap(),
            Err(FrameError::Guest(err)) if err.is_fatal() => break,
            Err(err) => return Err(err).context("guest stopped"),
        }
    }

    log::info!("exiting after {} frames", frame_loop.frames());
    Ok(())
}
