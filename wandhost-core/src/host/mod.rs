//! Services the host offers to the guest through its imports.
//!
//! The import layer never talks to the platform directly; it calls a [`HostServices`]
//! implementation stored in the wasmtime store. [`StandardServices`] logs through `log`, draws
//! seeds from the OS and forwards anything user-facing to the frontend as a [`HostRequest`].

use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{SystemTime, UNIX_EPOCH};

/// Log target used for everything the guest prints.
pub const GUEST_LOG_TARGET: &str = "guest";

/// Something the frontend must act on outside the frame loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    OpenUrl(String),
    Fullscreen(bool),
    /// The guest called `fail_`. Show the message to the user.
    Fatal(String),
}

/// Error raised inside a host import to abort the current guest call.
///
/// Travels through wasmtime as the trap payload and is recovered with
/// `anyhow::Error::downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("guest failure: {message}")]
pub struct GuestFailure {
    pub message: String,
}

pub trait HostServices: Send {
    fn print(&mut self, text: &str);
    fn print_f64(&mut self, value: f64);
    fn print_u64(&mut self, value: u64);
    fn print_i64(&mut self, value: i64);
    fn print_bytes(&mut self, bytes: &[u8]);

    /// The guest hit an unrecoverable error. The caller traps after this returns.
    fn fail(&mut self, message: &str);

    fn random_seed(&mut self) -> u64;
    fn open_url(&mut self, url: &str);
    fn set_fullscreen(&mut self, fullscreen: bool);
}

/// Default services: `log` output plus a request channel to the frontend.
pub struct StandardServices {
    requests: Sender<HostRequest>,
    warned_no_entropy: bool,
}

impl StandardServices {
    pub fn new() -> (Self, Receiver<HostRequest>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                requests: tx,
                warned_no_entropy: false,
            },
            rx,
        )
    }

    fn send(&self, request: HostRequest) {
        if self.requests.send(request).is_err() {
            log::debug!("host request dropped, frontend is gone");
        }
    }
}

impl HostServices for StandardServices {
    fn print(&mut self, text: &str) {
        log::info!(target: GUEST_LOG_TARGET, "{text}");
    }

    fn print_f64(&mut self, value: f64) {
        log::info!(target: GUEST_LOG_TARGET, "{value}");
    }

    fn print_u64(&mut self, value: u64) {
        log::info!(target: GUEST_LOG_TARGET, "{value}");
    }

    fn print_i64(&mut self, value: i64) {
        log::info!(target: GUEST_LOG_TARGET, "{value}");
    }

    fn print_bytes(&mut self, bytes: &[u8]) {
        log::info!(target: GUEST_LOG_TARGET, "{bytes:?}");
    }

    fn fail(&mut self, message: &str) {
        log::error!(target: GUEST_LOG_TARGET, "FAIL: {message}");
        self.send(HostRequest::Fatal(message.to_owned()));
    }

    fn random_seed(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => u64::from_be_bytes(bytes),
            Err(err) => {
                if !self.warned_no_entropy {
                    log::warn!("OS randomness unavailable ({err}), seeding from the clock");
                    self.warned_no_entropy = true;
                }
                time_seed()
            }
        }
    }

    fn open_url(&mut self, url: &str) {
        log::info!("guest requested url {url}");
        self.send(HostRequest::OpenUrl(url.to_owned()));
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.send(HostRequest::Fullscreen(fullscreen));
    }
}

/// Fallback seed when no OS randomness is available.
pub fn time_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    // splitmix64 finalizer, so close timestamps give unrelated seeds
    let mut z = nanos.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Session id handed to the guest by `set_uid_`: the seed as 16 uppercase hex digits.
pub fn session_uid(seed: u64) -> [u8; crate::abi::UID_LEN] {
    let mut uid = [0u8; crate::abi::UID_LEN];
    uid.copy_from_slice(format!("{seed:016X}").as_bytes());
    uid
}
