//! wandhost-core ABI module
//!
//! This module defines the ABI contract between:
//! - **Host**: `wandhost-core` (libretro core or desktop frontend)
//! - **Guest**: the loaded WASM module ("game")
//!
//! ## High-level model (shared buffers)
//! The guest owns four fixed-size buffers inside its own linear memory and tells the host
//! where they live by calling `share_memory_` during `state_init_`:
//! - a **palette** (32 RGB colors, `f32` channels)
//! - an indexed **pixel buffer** (400x240 `u8` palette indices)
//! - an **input vector** (11 logical buttons, one byte each)
//! - an **audio chunk** (480 interleaved stereo `f32` frames)
//!
//! The host never copies these buffers into its own state; it aliases them through
//! [`crate::bridge`] and re-derives the aliases whenever guest memory grows.
//!
//! ## Exports (host -> guest) required
//! - `memory`
//! - `state_init_()`: called once after instantiation
//! - `loop_game_(skip_draw: i32)`: one fixed simulation step
//! - `loop_sound_()`: synthesize exactly one audio chunk
//!
//! ## Imports (guest -> host)
//! Imported from module `"env"`, see [`host_imports`].
//!
//! The constants in this module are the wire contract. Both sides hard-code them; changing
//! any of them is a breaking ABI change.

use wasmtime::{Instance, Memory, Store, TypedFunc};

/// Import module name used by the guest.
pub const IMPORT_MODULE: &str = "env";

/// Fixed simulation rate in steps per second.
pub const SIM_STEPS_PER_SECOND: u32 = 480;

/// Audio sample rate in frames per second.
pub const SOUND_SAMPLES_PER_SECOND: u32 = 48_000;

/// Frames produced by one `loop_sound_` call (10 ms).
pub const SOUND_SAMPLES_PER_CHUNK: usize = (SOUND_SAMPLES_PER_SECOND / 100) as usize;

/// Interleaved channels in the audio chunk.
pub const SOUND_CHANNELS: usize = 2;

/// Palette entries.
pub const COLOR_COUNT: usize = 32;

/// Pixel buffer width in pixels.
pub const PIXEL_BUFFER_W: usize = 400;

/// Pixel buffer height in pixels.
pub const PIXEL_BUFFER_H: usize = 240;

/// Logical input slots.
pub const INPUT_COUNT: usize = 11;

/// Byte sizes of the shared regions.
pub mod layout {
    use super::*;

    pub const PALETTE_BYTES: usize = COLOR_COUNT * 3 * core::mem::size_of::<f32>();
    pub const PIXELS_BYTES: usize = PIXEL_BUFFER_W * PIXEL_BUFFER_H;
    pub const INPUTS_BYTES: usize = INPUT_COUNT;
    pub const SOUND_CHUNK_BYTES: usize =
        SOUND_SAMPLES_PER_CHUNK * SOUND_CHANNELS * core::mem::size_of::<f32>();
}

/// Guest export names (entrypoints).
pub mod guest_exports {
    pub const MEMORY: &str = "memory";
    /// Called once after instantiation.
    pub const INIT: &str = "state_init_";
    /// Called once per fixed simulation step.
    pub const STEP: &str = "loop_game_";
    /// Called once per synthesized audio chunk.
    pub const SOUND: &str = "loop_sound_";
}

/// Host import names provided to the guest.
///
/// These are the string names under module [`IMPORT_MODULE`].
pub mod host_imports {
    // Logging
    pub const PRINT: &str = "print_";
    pub const PRINT_FLOAT: &str = "print_float_";
    pub const PRINT_U64: &str = "print_u64_";
    pub const PRINT_I64: &str = "print_i64_";
    pub const PRINT_BYTES: &str = "print_bytes_";

    // Lifecycle
    pub const SHARE_MEMORY: &str = "share_memory_";
    pub const FAIL: &str = "fail_";

    // Platform services
    pub const GET_SEED: &str = "get_seed_";
    pub const OPEN_URL: &str = "open_url_";
    pub const SET_FULLSCREEN: &str = "set_fullscreen_";

    // Compatibility (session id, telemetry)
    pub const SET_UID: &str = "set_uid_";
    pub const POST_TO_DISCORD: &str = "post_to_discord_";
}

/// Bytes written by `set_uid_`.
pub const UID_LEN: usize = 16;

/// Helpers for validating guest exports.
pub mod validate {
    use super::guest_exports;
    use wasmtime::{Instance, Store};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MissingExport {
        Memory,
        Init,
        Step,
        Sound,
    }

    /// Validate that a guest instance exports every entrypoint this ABI requires.
    pub fn required_exports_present<T>(
        instance: &Instance,
        store: &mut Store<T>,
    ) -> Result<(), MissingExport> {
        if instance.get_memory(&mut *store, guest_exports::MEMORY).is_none() {
            return Err(MissingExport::Memory);
        }
        let checks = [
            (guest_exports::INIT, MissingExport::Init),
            (guest_exports::STEP, MissingExport::Step),
            (guest_exports::SOUND, MissingExport::Sound),
        ];
        for (name, missing) in checks {
            if instance.get_func(&mut *store, name).is_none() {
                return Err(missing);
            }
        }
        Ok(())
    }
}

/// The guest's entrypoints, resolved once after instantiation and called every frame.
#[derive(Clone)]
pub struct GuestEntrypoints {
    pub memory: Memory,
    pub init: TypedFunc<(), ()>,
    pub step: TypedFunc<i32, ()>,
    pub sound: TypedFunc<(), ()>,
}

impl GuestEntrypoints {
    /// Resolve entrypoint exports from an instance, checking their signatures.
    pub fn resolve<T>(instance: &Instance, store: &mut Store<T>) -> anyhow::Result<Self> {
        let memory = instance
            .get_memory(&mut *store, guest_exports::MEMORY)
            .ok_or_else(|| anyhow::anyhow!("guest does not export `{}`", guest_exports::MEMORY))?;
        let init = instance.get_typed_func::<(), ()>(&mut *store, guest_exports::INIT)?;
        let step = instance.get_typed_func::<i32, ()>(&mut *store, guest_exports::STEP)?;
        let sound = instance.get_typed_func::<(), ()>(&mut *store, guest_exports::SOUND)?;

        Ok(Self {
            memory,
            init,
            step,
            sound,
        })
    }
}
