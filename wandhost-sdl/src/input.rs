use sdl2::GameControllerSubsystem;
use sdl2::controller::{Axis, Button, GameController};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use wandhost_core::input::{GamepadState, Key, KeyboardState, pad};

/// SDL controller buttons at their index in the standard gamepad layout.
const BUTTON_LAYOUT: [(Button, usize); 15] = [
    (Button::A, pad::SOUTH),
    (Button::B, 1),
    (Button::X, pad::WEST),
    (Button::Y, 3),
    (Button::LeftShoulder, 4),
    (Button::RightShoulder, 5),
    (Button::Back, pad::SELECT),
    (Button::Start, pad::START),
    (Button::LeftStick, 10),
    (Button::RightStick, 11),
    (Button::DPadUp, pad::DPAD_UP),
    (Button::DPadDown, pad::DPAD_DOWN),
    (Button::DPadLeft, pad::DPAD_LEFT),
    (Button::DPadRight, pad::DPAD_RIGHT),
    (Button::Guide, 16),
];

const AXIS_LAYOUT: [(Axis, usize); 4] = [
    (Axis::LeftX, pad::AXIS_LEFT_X),
    (Axis::LeftY, pad::AXIS_LEFT_Y),
    (Axis::RightX, 2),
    (Axis::RightY, 3),
];

/// Triggers are analog on SDL and buttons 6/7 in the standard layout.
const TRIGGER_LAYOUT: [(Axis, usize); 2] = [(Axis::TriggerLeft, 6), (Axis::TriggerRight, 7)];
const TRIGGER_PRESSED: i16 = i16::MAX / 2;

pub fn key_for(scancode: Scancode) -> Option<Key> {
    match scancode {
        Scancode::Up => Some(Key::Up),
        Scancode::Right => Some(Key::Right),
        Scancode::Down => Some(Key::Down),
        Scancode::Left => Some(Key::Left),
        Scancode::Space => Some(Key::Space),
        Scancode::Return | Scancode::KpEnter => Some(Key::Enter),
        Scancode::Escape => Some(Key::Escape),
        _ => None,
    }
}

/// Whether `event` counts as a user gesture for starting audio.
pub fn is_user_gesture(event: &Event) -> bool {
    matches!(
        event,
        Event::KeyDown { repeat: false, .. }
            | Event::ControllerButtonDown { .. }
            | Event::MouseButtonDown { .. }
    )
}

/// Map an SDL axis value to `[-1, 1]`.
pub fn normalize_axis(value: i16) -> f32 {
    (f32::from(value) / f32::from(i16::MAX)).max(-1.0)
}

/// Update `keyboard` from a key event. Returns whether the event was a tracked key.
pub fn apply_key_event(event: &Event, keyboard: &mut KeyboardState) -> bool {
    let (scancode, pressed) = match event {
        Event::KeyDown {
            scancode: Some(sc), ..
        } => (*sc, true),
        Event::KeyUp {
            scancode: Some(sc), ..
        } => (*sc, false),
        _ => return false,
    };
    match key_for(scancode) {
        Some(key) => {
            keyboard.set(key, pressed);
            true
        }
        None => false,
    }
}

/// Connected game controllers.
pub struct Gamepads {
    subsystem: GameControllerSubsystem,
    open: Vec<GameController>,
}

impl Gamepads {
    pub fn new(subsystem: GameControllerSubsystem) -> Self {
        Self {
            subsystem,
            open: Vec::new(),
        }
    }

    /// Track controller hotplug events.
    pub fn handle_event(&mut self, event: &Event) {
        match *event {
            Event::ControllerDeviceAdded { which, .. } => match self.subsystem.open(which) {
                Ok(controller) => {
                    log::info!("gamepad connected: {}", controller.name());
                    self.open.push(controller);
                }
                Err(err) => log::warn!("failed to open gamepad {which}: {err}"),
            },
            Event::ControllerDeviceRemoved { which, .. } => {
                self.open.retain(|controller| {
                    let keep = controller.instance_id() != which;
                    if !keep {
                        log::info!("gamepad disconnected: {}", controller.name());
                    }
                    keep
                });
            }
            _ => {}
        }
    }

    /// Current state of every connected controller, in the standard layout.
    pub fn snapshot(&self, out: &mut Vec<GamepadState>) {
        out.clear();
        out.extend(self.open.iter().map(|controller| {
            let mut state = GamepadState::standard();
            for (button, index) in BUTTON_LAYOUT {
                state.buttons[index] = controller.button(button);
            }
            for (axis, index) in TRIGGER_LAYOUT {
                state.buttons[index] = controller.axis(axis) > TRIGGER_PRESSED;
            }
            for (axis, index) in AXIS_LAYOUT {
                state.axes[index] = normalize_axis(controller.axis(axis));
            }
            state
        }));
    }
}
