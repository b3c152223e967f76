//! Wasmtime-backed guest runtime.
//!
//! `runtime` owns engine setup, instantiation and the [`WasmGuest`] handle the frame loop
//! drives; `imports` defines the `"env"` functions the guest links against.

pub mod imports;
pub mod runtime;

pub use runtime::{LaunchError, WasmGuest, WasmtimeRuntime, launch};
