//! Host import definitions for the Wasmtime runtime.
//!
//! Every import lives under module `"env"`. Imports that read guest memory resolve the
//! exported `memory` through the caller; imports that act on the outside world go through the
//! [`HostServices`](crate::host::HostServices) stored in [`HostState`].
//!
//! Returning `Err` from an import traps the guest. [`GuestFailure`] and
//! [`BridgeError`](crate::bridge::BridgeError) are used as trap payloads so the frame loop can
//! tell a deliberate `fail_` apart from a crash.

use crate::abi::{IMPORT_MODULE, UID_LEN, guest_exports, host_imports};
use crate::bridge::SharedRegions;
use crate::host::GuestFailure;
use crate::state::HostState;

use anyhow::{Context, anyhow};
use wasmtime::{Caller, Linker, Memory};

fn guest_memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    caller
        .get_export(guest_exports::MEMORY)
        .and_then(|e| e.into_memory())
        .ok_or_else(|| anyhow!("guest does not export `{}`", guest_exports::MEMORY))
}

fn guest_range(data: &[u8], ptr: u32, len: u32) -> anyhow::Result<&[u8]> {
    let start = ptr as usize;
    start
        .checked_add(len as usize)
        .and_then(|end| data.get(start..end))
        .with_context(|| format!("guest range [{ptr}, +{len}) is outside linear memory"))
}

/// Run `f` with the guest bytes at `[ptr, ptr + len)` and the host state.
fn with_guest_bytes<R>(
    caller: &mut Caller<'_, HostState>,
    ptr: u32,
    len: u32,
    f: impl FnOnce(&[u8], &mut HostState) -> R,
) -> anyhow::Result<R> {
    let memory = guest_memory(caller)?;
    let (data, state) = memory.data_and_store_mut(caller);
    let bytes = guest_range(data, ptr, len)?;
    Ok(f(bytes, state))
}

/// Define all host imports expected by guests under module `"env"`.
///
/// Must be called before instantiating the module.
pub fn define_imports(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    // --- Logging ---
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::PRINT,
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<()> {
            with_guest_bytes(&mut caller, ptr, len, |bytes, state| {
                state.services.print(&String::from_utf8_lossy(bytes));
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::PRINT_FLOAT,
        |mut caller: Caller<'_, HostState>, value: f64| {
            caller.data_mut().services.print_f64(value);
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::PRINT_U64,
        |mut caller: Caller<'_, HostState>, value: u64| {
            caller.data_mut().services.print_u64(value);
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::PRINT_I64,
        |mut caller: Caller<'_, HostState>, value: i64| {
            caller.data_mut().services.print_i64(value);
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::PRINT_BYTES,
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<()> {
            with_guest_bytes(&mut caller, ptr, len, |bytes, state| {
                state.services.print_bytes(bytes);
            })
        },
    )?;

    // --- Lifecycle ---
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SHARE_MEMORY,
        |mut caller: Caller<'_, HostState>,
         palette: u32,
         pixels: u32,
         inputs: u32,
         sound_chunk: u32|
         -> anyhow::Result<()> {
            let memory = guest_memory(&mut caller)?;
            let memory_len = memory.data_size(&caller);
            let regions = SharedRegions {
                palette,
                pixels,
                inputs,
                sound_chunk,
            };
            // Out of bounds traps the guest with the bridge error as payload.
            caller.data_mut().bridge.register(regions, memory_len)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::FAIL,
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<()> {
            let message = with_guest_bytes(&mut caller, ptr, len, |bytes, state| {
                let message = String::from_utf8_lossy(bytes).into_owned();
                state.services.fail(&message);
                message
            })?;
            Err(GuestFailure { message }.into())
        },
    )?;

    // --- Platform services ---
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GET_SEED,
        |mut caller: Caller<'_, HostState>| -> u64 { caller.data_mut().services.random_seed() },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::OPEN_URL,
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<()> {
            with_guest_bytes(&mut caller, ptr, len, |bytes, state| {
                state.services.open_url(&String::from_utf8_lossy(bytes));
            })
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SET_FULLSCREEN,
        |mut caller: Caller<'_, HostState>, fullscreen: i32| {
            caller.data_mut().services.set_fullscreen(fullscreen != 0);
        },
    )?;

    // --- Compatibility ---
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SET_UID,
        |mut caller: Caller<'_, HostState>, ptr: u32| -> anyhow::Result<()> {
            let memory = guest_memory(&mut caller)?;
            let (data, state) = memory.data_and_store_mut(&mut caller);
            let uid = state.uid();
            let start = ptr as usize;
            let dst = start
                .checked_add(UID_LEN)
                .and_then(|end| data.get_mut(start..end))
                .with_context(|| format!("uid buffer at {ptr} is outside linear memory"))?;
            dst.copy_from_slice(&uid);
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::POST_TO_DISCORD,
        |_caller: Caller<'_, HostState>,
         _hook_ptr: u32,
         _hook_len: u32,
         message_ptr: u32,
         message_len: u32,
         _record_ptr: u32,
         record_len: u32| {
            log::debug!(
                "ignoring telemetry upload ({message_len} byte message at {message_ptr}, {record_len} byte record)"
            );
        },
    )?;

    Ok(())
}
