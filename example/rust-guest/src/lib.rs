#![no_std]

// Minimal wandhost Rust guest.
//
// Compiled to `wasm32-unknown-unknown` and loaded by wandhost. The host calls:
// - `state_init_()` once, where we share our buffers.
// - `loop_game_(skip_draw)` 480 times per second.
// - `loop_sound_()` whenever it needs the next 10 ms of audio.
//
// A square avatar walks left/right and jumps over a palette gradient; holding the wand button
// plays a tone.

use wandhost_sdk::prelude::*;

// With the `std` feature off nothing else provides one.
#[cfg(all(not(feature = "std"), target_arch = "wasm32"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    core::arch::wasm32::unreachable()
}

static mut PALETTE: Palette = [[0.0; 3]; COLOR_COUNT];
static mut PIXELS: Pixels = [0; PIXEL_BUFFER_W * PIXEL_BUFFER_H];
static mut INPUTS: Inputs = [0; INPUT_COUNT];
static mut SOUND: SoundChunk = [[0.0; 2]; SOUND_SAMPLES_PER_CHUNK];

const AVATAR_SIZE: i32 = 16;
const AVATAR_COLOR: u8 = 31;
const GROUND_Y: i32 = 24;
const WALK_SPEED: i32 = 1;
/// Vertical speed in 1/16 pixel per step.
const JUMP_SPEED: i32 = 48;
const GRAVITY: i32 = 1;
const TONE_HZ: f32 = 220.0;

struct Game {
    x: i32,
    /// Height above the ground in 1/16 pixels.
    y: i32,
    vy: i32,
    steps: u64,
    phase: f32,
}

static mut GAME: Game = Game {
    x: (PIXEL_BUFFER_W as i32 - AVATAR_SIZE) / 2,
    y: 0,
    vy: 0,
    steps: 0,
    phase: 0.0,
};

#[unsafe(no_mangle)]
pub extern "C" fn state_init_() {
    let palette = unsafe { &mut *(&raw mut PALETTE) };
    for (i, color) in palette.iter_mut().enumerate().take(COLOR_COUNT - 1) {
        let t = i as f32 / (COLOR_COUNT - 2) as f32;
        *color = [0.1 * t, 0.2 + 0.3 * t, 0.4 + 0.5 * t];
    }
    palette[AVATAR_COLOR as usize] = [1.0, 0.8, 0.2];

    unsafe {
        share_memory(
            &raw mut PALETTE,
            &raw mut PIXELS,
            &raw mut INPUTS,
            &raw mut SOUND,
        );
    }

    let seed = seed();
    print("rust_guest ready");
    wandhost_sdk::print_u64(seed);
}

#[unsafe(no_mangle)]
pub extern "C" fn loop_game_(skip_draw: i32) {
    let game = unsafe { &mut *(&raw mut GAME) };
    let inputs = unsafe { &*(&raw const INPUTS) };

    if Button::AvatarLeft.is_down(inputs) {
        game.x -= WALK_SPEED;
    }
    if Button::AvatarRight.is_down(inputs) {
        game.x += WALK_SPEED;
    }
    game.x = game.x.clamp(0, PIXEL_BUFFER_W as i32 - AVATAR_SIZE);

    if game.y == 0 && Button::AvatarJump.is_down(inputs) {
        game.vy = JUMP_SPEED;
    }
    game.y += game.vy;
    game.vy -= GRAVITY;
    if game.y <= 0 {
        game.y = 0;
        game.vy = 0;
    }
    game.steps += 1;

    if skip_draw == 0 {
        draw(game);
    }
}

fn draw(game: &Game) {
    let pixels = unsafe { &mut *(&raw mut PIXELS) };

    // Rows are stored bottom-up, so the gradient brightens towards the top of the screen.
    for (row, line) in pixels.chunks_exact_mut(PIXEL_BUFFER_W).enumerate() {
        let shade = (row * (COLOR_COUNT - 1) / PIXEL_BUFFER_H) as u8;
        line.fill(shade);
    }

    let bottom = GROUND_Y + game.y / 16;
    for row in bottom..bottom + AVATAR_SIZE {
        let start = row as usize * PIXEL_BUFFER_W + game.x as usize;
        if let Some(span) = pixels.get_mut(start..start + AVATAR_SIZE as usize) {
            span.fill(AVATAR_COLOR);
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn loop_sound_() {
    let game = unsafe { &mut *(&raw mut GAME) };
    let sound = unsafe { &mut *(&raw mut SOUND) };
    let inputs = unsafe { &*(&raw const INPUTS) };

    let playing = Button::AvatarWand.is_down(inputs);
    let step = TONE_HZ / SOUND_SAMPLES_PER_SECOND as f32;
    for frame in sound.iter_mut() {
        // Triangle wave; no libm in no_std.
        let value = if playing {
            let d = game.phase - 0.5;
            let d = if d < 0.0 { -d } else { d };
            0.25 * (4.0 * d - 1.0)
        } else {
            0.0
        };
        *frame = [value, value];
        game.phase += step;
        if game.phase >= 1.0 {
            game.phase -= 1.0;
        }
    }
}
