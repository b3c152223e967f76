//! Input sampling for wandhost-core.
//!
//! Frontends report raw device state as [`InputDevices`] (seven keyboard keys plus any number
//! of standard-layout gamepads). Once per simulation step [`InputSampler::sample`] folds that
//! state into the guest's 11-slot [`InputVector`], which the frame loop then writes into the
//! shared input region.
//!
//! Digital sources are OR-ed together. Analog sticks use hysteresis: a button that was set on
//! the previous step stays set down to the lower `hold` threshold.

use crate::abi::INPUT_COUNT;

/// Logical buttons in guest wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Button {
    Pause = 0,
    MenuUp = 1,
    MenuDown = 2,
    MenuSelect = 3,
    MenuLeft = 4,
    MenuRight = 5,
    AvatarLeft = 6,
    AvatarRight = 7,
    AvatarDuck = 8,
    AvatarJump = 9,
    AvatarWand = 10,
}

impl Button {
    pub const ALL: [Button; INPUT_COUNT] = [
        Button::Pause,
        Button::MenuUp,
        Button::MenuDown,
        Button::MenuSelect,
        Button::MenuLeft,
        Button::MenuRight,
        Button::AvatarLeft,
        Button::AvatarRight,
        Button::AvatarDuck,
        Button::AvatarJump,
        Button::AvatarWand,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Keyboard keys the host tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Right,
    Down,
    Left,
    Space,
    Enter,
    Escape,
}

impl Key {
    const COUNT: usize = 7;

    const fn slot(self) -> usize {
        match self {
            Key::Up => 0,
            Key::Right => 1,
            Key::Down => 2,
            Key::Left => 3,
            Key::Space => 4,
            Key::Enter => 5,
            Key::Escape => 6,
        }
    }
}

/// Held/released state of the tracked keyboard keys. Frontends update it on key events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardState([bool; Key::COUNT]);

impl KeyboardState {
    pub fn set(&mut self, key: Key, pressed: bool) {
        self.0[key.slot()] = pressed;
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.0[key.slot()]
    }

    pub fn any_pressed(&self) -> bool {
        self.0.iter().any(|&k| k)
    }
}

/// Standard-layout gamepad buttons.
pub mod pad {
    pub const SOUTH: usize = 0;
    pub const WEST: usize = 2;
    pub const SELECT: usize = 8;
    pub const START: usize = 9;
    pub const DPAD_UP: usize = 12;
    pub const DPAD_DOWN: usize = 13;
    pub const DPAD_LEFT: usize = 14;
    pub const DPAD_RIGHT: usize = 15;

    /// Buttons in the standard mapping.
    pub const BUTTON_COUNT: usize = 17;

    pub const AXIS_LEFT_X: usize = 0;
    pub const AXIS_LEFT_Y: usize = 1;
}

/// One connected gamepad, in the standard layout.
///
/// Pads may report fewer buttons or axes than the standard layout; missing ones read as
/// released / centered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamepadState {
    pub buttons: Vec<bool>,
    pub axes: Vec<f32>,
}

impl GamepadState {
    pub fn standard() -> Self {
        Self {
            buttons: vec![false; pad::BUTTON_COUNT],
            axes: vec![0.0; 4],
        }
    }

    pub fn button(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }

    pub fn axis(&self, index: usize) -> f32 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }
}

/// Everything the sampler reads for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputDevices {
    pub keyboard: KeyboardState,
    pub gamepads: Vec<GamepadState>,
}

/// The guest-facing button vector, one byte per [`Button`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputVector([u8; INPUT_COUNT]);

impl InputVector {
    pub fn is_set(&self, button: Button) -> bool {
        self.0[button.index()] != 0
    }

    pub fn as_bytes(&self) -> &[u8; INPUT_COUNT] {
        &self.0
    }

    /// Buttons currently set, in wire order.
    pub fn pressed(&self) -> impl Iterator<Item = Button> + '_ {
        Button::ALL.into_iter().filter(|b| self.is_set(*b))
    }

    /// Copy into the guest's input region.
    pub fn write_to(&self, region: &mut [u8]) {
        let n = region.len().min(INPUT_COUNT);
        region[..n].copy_from_slice(&self.0[..n]);
    }

    fn set_index(&mut self, index: usize, pressed: bool) {
        let Some(slot) = self.0.get_mut(index) else {
            log::error!("input index {index} outside the {INPUT_COUNT} logical buttons");
            debug_assert!(false, "input index {index} out of range");
            return;
        };
        if pressed {
            *slot = 1;
        }
    }

    fn set(&mut self, button: Button, pressed: bool) {
        self.set_index(button.index(), pressed);
    }
}

/// Analog stick thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisThresholds {
    /// Deflection needed to set a button that was released on the previous step.
    pub set: f32,
    /// Deflection needed to keep a button that was set on the previous step.
    pub hold: f32,
}

impl Default for AxisThresholds {
    fn default() -> Self {
        Self {
            set: 0.375,
            hold: 0.35,
        }
    }
}

/// Stateful sampler holding the previous step's vector.
#[derive(Debug, Clone, Default)]
pub struct InputSampler {
    current: InputVector,
    previous: InputVector,
    thresholds: AxisThresholds,
}

impl InputSampler {
    pub fn new(thresholds: AxisThresholds) -> Self {
        Self {
            thresholds,
            ..Self::default()
        }
    }

    /// The vector produced by the last [`sample`](Self::sample).
    pub fn current(&self) -> InputVector {
        self.current
    }

    /// Sample once per simulation step.
    pub fn sample(&mut self, devices: &InputDevices) -> InputVector {
        self.previous = self.current;
        let mut next = InputVector::default();

        let kb = &devices.keyboard;
        next.set(Button::Pause, kb.is_pressed(Key::Escape));
        next.set(Button::MenuUp, kb.is_pressed(Key::Up));
        next.set(Button::MenuDown, kb.is_pressed(Key::Down));
        next.set(Button::MenuSelect, kb.is_pressed(Key::Space));
        next.set(Button::MenuSelect, kb.is_pressed(Key::Enter));
        next.set(Button::MenuLeft, kb.is_pressed(Key::Left));
        next.set(Button::MenuRight, kb.is_pressed(Key::Right));
        next.set(Button::AvatarLeft, kb.is_pressed(Key::Left));
        next.set(Button::AvatarRight, kb.is_pressed(Key::Right));
        next.set(Button::AvatarDuck, kb.is_pressed(Key::Down));
        next.set(Button::AvatarJump, kb.is_pressed(Key::Up));
        next.set(Button::AvatarWand, kb.is_pressed(Key::Space));

        for gamepad in &devices.gamepads {
            self.apply_gamepad(&mut next, gamepad);
        }

        self.current = next;
        next
    }

    fn apply_gamepad(&self, next: &mut InputVector, gamepad: &GamepadState) {
        let b = |i| gamepad.button(i);
        next.set(Button::Pause, b(pad::SELECT));
        next.set(Button::Pause, b(pad::START));
        next.set(Button::MenuUp, b(pad::DPAD_UP));
        next.set(Button::MenuDown, b(pad::DPAD_DOWN));
        next.set(Button::MenuSelect, b(pad::SOUTH));
        next.set(Button::MenuSelect, b(pad::WEST));
        next.set(Button::MenuLeft, b(pad::DPAD_LEFT));
        next.set(Button::MenuRight, b(pad::DPAD_RIGHT));
        next.set(Button::AvatarLeft, b(pad::DPAD_LEFT));
        next.set(Button::AvatarRight, b(pad::DPAD_RIGHT));
        next.set(Button::AvatarDuck, b(pad::DPAD_DOWN));
        next.set(Button::AvatarJump, b(pad::SOUTH));
        next.set(Button::AvatarWand, b(pad::WEST));

        let x = gamepad.axis(pad::AXIS_LEFT_X);
        let y = gamepad.axis(pad::AXIS_LEFT_Y);
        self.axis(next, Button::MenuUp, false, y);
        self.axis(next, Button::MenuDown, true, y);
        self.axis(next, Button::MenuLeft, false, x);
        self.axis(next, Button::MenuRight, true, x);
        self.axis(next, Button::AvatarLeft, false, x);
        self.axis(next, Button::AvatarRight, true, x);
        self.axis(next, Button::AvatarDuck, true, y);
    }

    fn axis(&self, next: &mut InputVector, button: Button, positive: bool, value: f32) {
        let threshold = if self.previous.is_set(button) {
            self.thresholds.hold
        } else {
            self.thresholds.set
        };
        let pressed = if positive {
            value > threshold
        } else {
            value < -threshold
        };
        next.set(button, pressed);
    }
}
