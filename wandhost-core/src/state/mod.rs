//! Per-guest host state, stored as the wasmtime `Store` data.
//!
//! Everything the host imports need lives here: the memory bridge, the injected services and
//! the session id. There is no global state; each loaded guest owns its own `HostState`.

use crate::abi::UID_LEN;
use crate::bridge::MemoryBridge;
use crate::host::{HostServices, session_uid};
use wasmtime::ResourceLimiter;

pub struct HostState {
    pub bridge: MemoryBridge,
    pub services: Box<dyn HostServices>,
    uid: Option<[u8; UID_LEN]>,
    memory_growths: u64,
}

impl HostState {
    pub fn new(services: Box<dyn HostServices>) -> Self {
        Self {
            bridge: MemoryBridge::new(),
            services,
            uid: None,
            memory_growths: 0,
        }
    }

    /// Session id, created from a fresh seed on first use.
    pub fn uid(&mut self) -> [u8; UID_LEN] {
        let services = &mut self.services;
        *self
            .uid
            .get_or_insert_with(|| session_uid(services.random_seed()))
    }

    /// How many times guest memory has grown (including the host's startup growth).
    pub fn memory_growths(&self) -> u64 {
        self.memory_growths
    }
}

impl ResourceLimiter for HostState {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if maximum.is_some_and(|max| desired > max) {
            return Ok(false);
        }
        // Also called once when the memory is first allocated; nothing is bound yet then.
        if current > 0 {
            self.memory_growths += 1;
            log::debug!("guest memory growing {current} -> {desired} bytes");
        }
        self.bridge.notify_growth();
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(maximum.is_none_or(|max| desired <= max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StandardServices;

    #[test]
    fn uid_is_stable_for_the_session() {
        let (services, _rx) = StandardServices::new();
        let mut state = HostState::new(Box::new(services));
        let first = state.uid();
        assert_eq!(state.uid(), first);
        assert!(first.iter().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_lowercase()));
    }

    #[test]
    fn growth_invalidates_bridge() {
        let (services, _rx) = StandardServices::new();
        let mut state = HostState::new(Box::new(services));
        assert!(state.memory_growing(65_536, 131_072, None).unwrap());
        assert_eq!(state.bridge.generation(), 1);
        assert_eq!(state.memory_growths(), 1);
        assert!(!state.memory_growing(65_536, 131_072, Some(65_536)).unwrap());
        assert_eq!(state.bridge.generation(), 1);
    }

    #[test]
    fn state_can_move_to_another_thread() {
        let (services, _rx) = StandardServices::new();
        let mut state = HostState::new(Box::new(services));
        let uid = state.uid();
        let moved = std::thread::spawn(move || state.uid()).join().unwrap();
        assert_eq!(moved, uid);
    }
}
