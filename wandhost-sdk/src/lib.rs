#![cfg_attr(not(feature = "std"), no_std)]

//! wandhost-sdk (handwritten)
//!
//! Used by **guest** WASM games that run inside wandhost.
//!
//! ABI model (shared buffers):
//! - The game owns four fixed-size buffers ([`Palette`], [`Pixels`], [`Inputs`],
//!   [`SoundChunk`]) and registers them once with [`share_memory`] from `state_init_`.
//! - The host writes [`Inputs`] before every step and reads the other three.
//! - The game exports `state_init_()`, `loop_game_(skip_draw: i32)` and `loop_sound_()`.
//!
//! Row 0 of [`Pixels`] is the bottom row of the screen.

/// Fixed simulation rate.
pub const SIM_STEPS_PER_SECOND: u32 = 480;
pub const SOUND_SAMPLES_PER_SECOND: u32 = 48_000;
/// Frames synthesized per `loop_sound_` call.
pub const SOUND_SAMPLES_PER_CHUNK: usize = (SOUND_SAMPLES_PER_SECOND / 100) as usize;
pub const COLOR_COUNT: usize = 32;
pub const PIXEL_BUFFER_W: usize = 400;
pub const PIXEL_BUFFER_H: usize = 240;
pub const INPUT_COUNT: usize = 11;
pub const UID_LEN: usize = 16;

/// RGB colors, channels in `[0, 1]`.
pub type Palette = [[f32; 3]; COLOR_COUNT];
/// Palette indices, row-major, bottom row first.
pub type Pixels = [u8; PIXEL_BUFFER_W * PIXEL_BUFFER_H];
/// One byte per [`Button`], 0 or 1.
pub type Inputs = [u8; INPUT_COUNT];
/// Interleaved `[left, right]` frames.
pub type SoundChunk = [[f32; 2]; SOUND_SAMPLES_PER_CHUNK];

const _: () = assert!(core::mem::size_of::<Palette>() == 384);
const _: () = assert!(core::mem::size_of::<Pixels>() == 96_000);
const _: () = assert!(core::mem::size_of::<SoundChunk>() == 3_840);

/// Logical buttons, in the order the host writes them.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
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
    /// Whether this button is held in `inputs`.
    pub fn is_down(self, inputs: &Inputs) -> bool {
        inputs[self as usize] != 0
    }
}

/// Low-level raw ABI imports.
pub mod sys {
    unsafe extern "C" {
        #[link_name = "print_"]
        pub fn print(ptr: u32, len: u32);
        #[link_name = "print_float_"]
        pub fn print_float(value: f64);
        #[link_name = "print_u64_"]
        pub fn print_u64(value: u64);
        #[link_name = "print_i64_"]
        pub fn print_i64(value: i64);
        #[link_name = "print_bytes_"]
        pub fn print_bytes(ptr: u32, len: u32);

        #[link_name = "share_memory_"]
        pub fn share_memory(palette: u32, pixels: u32, inputs: u32, sound_chunk: u32);
        #[link_name = "fail_"]
        pub fn fail(ptr: u32, len: u32);

        #[link_name = "get_seed_"]
        pub fn get_seed() -> u64;
        #[link_name = "open_url_"]
        pub fn open_url(ptr: u32, len: u32);
        #[link_name = "set_fullscreen_"]
        pub fn set_fullscreen(fullscreen: i32);
        #[link_name = "set_uid_"]
        pub fn set_uid(ptr: u32);
    }
}

/// Log a line on the host.
pub fn print(text: &str) {
    unsafe { sys::print(text.as_ptr() as u32, text.len() as u32) }
}

pub fn print_f64(value: f64) {
    unsafe { sys::print_float(value) }
}

pub fn print_u64(value: u64) {
    unsafe { sys::print_u64(value) }
}

pub fn print_i64(value: i64) {
    unsafe { sys::print_i64(value) }
}

pub fn print_bytes(bytes: &[u8]) {
    unsafe { sys::print_bytes(bytes.as_ptr() as u32, bytes.len() as u32) }
}

/// Abort the game. The host shows `message` to the player and stops calling in.
pub fn fail(message: &str) -> ! {
    unsafe { sys::fail(message.as_ptr() as u32, message.len() as u32) }
    // The host traps inside `fail_`; control never comes back here.
    #[cfg(target_arch = "wasm32")]
    core::arch::wasm32::unreachable();
    #[cfg(not(target_arch = "wasm32"))]
    unreachable!("fail_ returned");
}

/// 64 bits of OS randomness.
pub fn seed() -> u64 {
    unsafe { sys::get_seed() }
}

pub fn open_url(url: &str) {
    unsafe { sys::open_url(url.as_ptr() as u32, url.len() as u32) }
}

pub fn set_fullscreen(fullscreen: bool) {
    unsafe { sys::set_fullscreen(fullscreen as i32) }
}

/// Session id: 16 uppercase hex digits, stable until the host restarts.
pub fn uid() -> [u8; UID_LEN] {
    let mut uid = [0u8; UID_LEN];
    unsafe { sys::set_uid(uid.as_mut_ptr() as u32) }
    uid
}

/// Tell the host where the shared buffers live.
///
/// # Safety
///
/// All four pointers must stay valid for the rest of the program (in practice: point at
/// `static mut` buffers) and must not be moved. The host reads and writes them between calls.
pub unsafe fn share_memory(
    palette: *mut Palette,
    pixels: *mut Pixels,
    inputs: *mut Inputs,
    sound_chunk: *mut SoundChunk,
) {
    unsafe {
        sys::share_memory(
            palette as u32,
            pixels as u32,
            inputs as u32,
            sound_chunk as u32,
        )
    }
}

/// Convenience prelude for guest games.
pub mod prelude {
    pub use crate::{
        Button, COLOR_COUNT, INPUT_COUNT, Inputs, PIXEL_BUFFER_H, PIXEL_BUFFER_W, Palette,
        Pixels, SOUND_SAMPLES_PER_CHUNK, SOUND_SAMPLES_PER_SECOND, SoundChunk,
    };
    pub use crate::{fail, print, seed, share_memory};
}
