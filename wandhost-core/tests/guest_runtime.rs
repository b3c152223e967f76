//! End-to-end tests: WAT guests instantiated through wasmtime and driven by the frame loop.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wandhost_core::abi::validate::MissingExport;
use wandhost_core::audio::{AudioRing, RingConsumer, RingProducer};
use wandhost_core::bridge::BridgeError;
use wandhost_core::config::{Config, RuntimeConfig};
use wandhost_core::driver::{FrameError, FrameLoop, Guest, GuestError};
use wandhost_core::host::{HostRequest, HostServices, StandardServices};
use wandhost_core::input::{Button, InputDevices, Key};
use wandhost_core::runtime::{self, LaunchError, WasmGuest};
use wandhost_core::video::SoftwareRenderer;

const FRAME_60HZ: Duration = Duration::from_nanos(16_666_667);

const PALETTE: u32 = 256;
const PIXELS: u32 = 1024;
const INPUTS: u32 = 97_100;
const SOUND: u32 = 97_200;

const TEMPLATE: &str = r#"
(module
  (import "env" "share_memory_" (func $share (param i32 i32 i32 i32)))
  (import "env" "print_" (func $print (param i32 i32)))
  (import "env" "fail_" (func $fail (param i32 i32)))
  (import "env" "set_uid_" (func $set_uid (param i32)))
  (memory (export "memory") 2)
  (data (i32.const 16) "hello")
  (data (i32.const 32) "boom")
  (global $steps (mut i32) (i32.const 0))
  (global $chunks (mut i32) (i32.const 0))

  (func (export "state_init_")
    (f32.store (i32.const 256) (f32.const 1.0))
    SHARE
    (call $print (i32.const 16) (i32.const 5))
    (call $set_uid (i32.const 64)))

  (func (export "loop_game_") (param $skip i32)
    (global.set $steps (i32.add (global.get $steps) (i32.const 1)))
    STEP_EXTRA
    (if (i32.eqz (local.get $skip))
      (then (i32.store8 (i32.const 1024) (global.get $steps)))))

  SOUND_EXPORT
)
"#;

const SHARE: &str = "(call $share (i32.const 256) (i32.const 1024) (i32.const 97100) (i32.const 97200))";

const SOUND_EXPORT: &str = r#"
  (func (export "loop_sound_")
    (local $i i32)
    (global.set $chunks (i32.add (global.get $chunks) (i32.const 1)))
    (loop $fill
      (f32.store
        (i32.add (i32.const 97200) (i32.shl (local.get $i) (i32.const 2)))
        (f32.convert_i32_u (global.get $chunks)))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br_if $fill (i32.lt_u (local.get $i) (i32.const 960)))))
"#;

struct GuestSource {
    share: &'static str,
    step_extra: &'static str,
    sound_export: &'static str,
}

impl Default for GuestSource {
    fn default() -> Self {
        Self {
            share: SHARE,
            step_extra: "",
            sound_export: SOUND_EXPORT,
        }
    }
}

impl GuestSource {
    fn wat(&self) -> String {
        TEMPLATE
            .replace("SHARE", self.share)
            .replace("STEP_EXTRA", self.step_extra)
            .replace("SOUND_EXPORT", self.sound_export)
    }
}

#[derive(Clone, Default)]
struct Recorder {
    prints: Arc<Mutex<Vec<String>>>,
}

impl HostServices for Recorder {
    fn print(&mut self, text: &str) {
        self.prints.lock().unwrap().push(text.to_owned());
    }
    fn print_f64(&mut self, _value: f64) {}
    fn print_u64(&mut self, _value: u64) {}
    fn print_i64(&mut self, _value: i64) {}
    fn print_bytes(&mut self, _bytes: &[u8]) {}
    fn fail(&mut self, _message: &str) {}
    fn random_seed(&mut self) -> u64 {
        0x0123_4567_89AB_CDEF
    }
    fn open_url(&mut self, _url: &str) {}
    fn set_fullscreen(&mut self, _fullscreen: bool) {}
}

fn launch(source: &GuestSource) -> Result<(WasmGuest, Receiver<HostRequest>), LaunchError> {
    let (services, requests) = StandardServices::new();
    let guest = runtime::launch(
        source.wat().as_bytes(),
        &RuntimeConfig::default(),
        Box::new(services),
    )?;
    Ok((guest, requests))
}

struct Harness {
    guest: WasmGuest,
    requests: Receiver<HostRequest>,
    frame_loop: FrameLoop,
    renderer: SoftwareRenderer,
    producer: RingProducer,
    consumer: RingConsumer,
    devices: InputDevices,
    now: Duration,
}

impl Harness {
    fn new(source: &GuestSource) -> Self {
        let (guest, requests) = launch(source).unwrap();
        let config = Config::default();
        let (producer, consumer) = AudioRing::new(config.audio.ring_frames);
        consumer.set_paused(false);
        Self {
            guest,
            requests,
            frame_loop: FrameLoop::new(&config),
            renderer: SoftwareRenderer::new(),
            producer,
            consumer,
            devices: InputDevices::default(),
            now: Duration::ZERO,
        }
    }

    fn frame(&mut self) -> Result<u32, FrameError> {
        let report = self.frame_loop.run_frame(
            self.now,
            &mut self.guest,
            &self.devices,
            &mut self.renderer,
            &mut self.producer,
        )?;
        self.now += FRAME_60HZ;
        Ok(report.steps)
    }

    fn drawn_pixel(&mut self) -> u8 {
        self.guest.shared().unwrap().pixels().unwrap().as_bytes()[0]
    }
}

#[test]
fn launch_grows_memory_and_registers_regions() {
    let recorder = Recorder::default();
    let prints = Arc::clone(&recorder.prints);
    let guest = runtime::launch(
        GuestSource::default().wat().as_bytes(),
        &RuntimeConfig::default(),
        Box::new(recorder),
    )
    .unwrap();

    assert!(guest.state().bridge.is_shared());
    assert_eq!(guest.memory_size(), (2 + 64) * 65_536);
    assert_eq!(*prints.lock().unwrap(), vec!["hello".to_owned()]);

    let regions = guest.state().bridge.regions().unwrap();
    assert_eq!(
        (regions.palette, regions.pixels, regions.inputs, regions.sound_chunk),
        (PALETTE, PIXELS, INPUTS, SOUND)
    );
}

#[test]
fn sixty_hz_frames_step_eight_times_and_draw_once() {
    let mut h = Harness::new(&GuestSource::default());
    assert_eq!(h.frame().unwrap(), 0);

    let mut total = 0;
    for _ in 0..8 {
        let steps = h.frame().unwrap();
        assert!(steps <= 16);
        total += steps;
    }
    assert_eq!(total, 64);
    // Only the last step of each frame draws, so the drawn step count is the running total.
    assert_eq!(h.drawn_pixel(), 64);
    assert_eq!(h.renderer.draws(), 9);
}

#[test]
fn audio_chunks_reach_the_ring_in_order() {
    let mut h = Harness::new(&GuestSource::default());
    h.frame().unwrap();
    assert_eq!(h.frame_loop.scheduler().state().samples_output, 7 * 480);

    let mut out = vec![0.0f32; 2 * 960];
    h.consumer.render(&mut out);
    assert_eq!(&out[..2], &[1.0, 1.0]);
    assert_eq!(&out[958..960], &[1.0, 1.0]);
    assert_eq!(&out[960..962], &[2.0, 2.0]);
    assert_eq!(h.producer.underrun_frames(), 0);
}

#[test]
fn inputs_are_visible_to_the_guest() {
    let mut h = Harness::new(&GuestSource::default());
    h.devices.keyboard.set(Key::Space, true);
    h.frame().unwrap();
    h.frame().unwrap();

    let mut shared = h.guest.shared().unwrap();
    let inputs = shared.inputs_mut().unwrap();
    assert_eq!(inputs[Button::MenuSelect.index()], 1);
    assert_eq!(inputs[Button::AvatarWand.index()], 1);
    assert_eq!(inputs[Button::Pause.index()], 0);
}

#[test]
fn growth_on_every_step_keeps_shared_views_valid() {
    let mut h = Harness::new(&GuestSource {
        step_extra: "(drop (memory.grow (i32.const 1)))",
        ..GuestSource::default()
    });
    let before = h.guest.memory_size();
    h.frame().unwrap();
    for _ in 0..3 {
        h.frame().unwrap();
    }

    assert_eq!(h.guest.memory_size(), before + 24 * 65_536);
    assert!(h.guest.state().memory_growths() >= 25);
    let mut shared = h.guest.shared().unwrap();
    assert_eq!(shared.palette().unwrap().color(0), Some([1.0, 0.0, 0.0]));
    assert_eq!(shared.pixels().unwrap().as_bytes()[0], 24);
}

#[test]
fn fail_halts_the_loop_and_notifies_the_frontend() {
    let mut h = Harness::new(&GuestSource {
        step_extra: "(if (i32.eq (global.get $steps) (i32.const 3)) (then (call $fail (i32.const 32) (i32.const 4))))",
        ..GuestSource::default()
    });
    h.frame().unwrap();

    match h.frame() {
        Err(FrameError::Guest(GuestError::Fatal(message))) => assert_eq!(message, "boom"),
        other => panic!("expected a fatal guest error, got {other:?}"),
    }
    assert_eq!(h.requests.try_recv(), Ok(HostRequest::Fatal("boom".into())));
    assert!(matches!(h.frame(), Err(FrameError::Halted)));
}

#[test]
fn traps_are_reported_as_traps() {
    let mut h = Harness::new(&GuestSource {
        step_extra: "(unreachable)",
        ..GuestSource::default()
    });
    h.frame().unwrap();
    assert!(matches!(h.frame(), Err(FrameError::Guest(GuestError::Trap(_)))));
}

#[test]
fn out_of_bounds_share_fails_launch() {
    let err = launch(&GuestSource {
        share: "(call $share (i32.const 256) (i32.const -256) (i32.const 97100) (i32.const 97200))",
        ..GuestSource::default()
    })
    .err()
    .unwrap();
    assert!(matches!(
        err,
        LaunchError::Init(GuestError::Bridge(BridgeError::OutOfBounds { .. }))
    ));
}

#[test]
fn init_without_share_is_rejected() {
    let err = launch(&GuestSource {
        share: "",
        ..GuestSource::default()
    })
    .err()
    .unwrap();
    assert!(matches!(err, LaunchError::NotShared));
}

#[test]
fn missing_sound_export_is_rejected() {
    let err = launch(&GuestSource {
        sound_export: "",
        ..GuestSource::default()
    })
    .err()
    .unwrap();
    assert!(matches!(err, LaunchError::MissingExport(MissingExport::Sound)));
}
