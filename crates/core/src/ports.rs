//! Race-free port allocation for process-based instances.
//!
//! A preferred port is granted whenever nobody holds it. Otherwise the
//! allocator scans upward from its cursor, skipping held ports. The cursor
//! only moves forward, so a freshly released port is not handed out again
//! until the scan wraps around the port range.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};

/// Default first port handed out when no preference is given.
pub const DEFAULT_BASE_PORT: u16 = 8000;

#[derive(Debug)]
struct PortState {
    held: HashSet<u16>,
    /// Next candidate for an unpreferenced allocation.
    cursor: u16,
}

/// Hands out unique ports. Safe to share between concurrent deploys.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    state: Mutex<PortState>,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            state: Mutex::new(PortState {
                held: HashSet::new(),
                cursor: base,
            }),
        }
    }

    /// Grant `preferred` if it is free, else the next free port at or
    /// after the cursor.
    pub fn allocate(&self, preferred: Option<u16>) -> CoreResult<u16> {
        let mut state = self.state.lock();

        if let Some(port) = preferred.filter(|p| *p != 0) {
            if state.held.insert(port) {
                if port >= state.cursor {
                    state.cursor = port.saturating_add(1);
                }
                return Ok(port);
            }
        }

        let start = state.cursor.max(self.base);
        let span = u32::from(u16::MAX - self.base) + 1;
        for offset in 0..span {
            let candidate = self.base + ((u32::from(start - self.base) + offset) % span) as u16;
            if !state.held.contains(&candidate) {
                state.held.insert(candidate);
                state.cursor = candidate.checked_add(1).unwrap_or(self.base);
                return Ok(candidate);
            }
        }

        Err(CoreError::ResourceLimit(format!(
            "no free port at or above {}",
            self.base
        )))
    }

    /// Release a port. Releasing an unheld port is a no-op.
    pub fn release(&self, port: u16) {
        self.state.lock().held.remove(&port);
    }

    pub fn is_held(&self, port: u16) -> bool {
        self.state.lock().held.contains(&port)
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn cursor_does_not_rewind_to_released_port() {
        let ports = PortAllocator::new(8000);
        let a = ports.allocate(Some(8000)).unwrap();
        let b = ports.allocate(None).unwrap();
        assert_eq!((a, b), (8000, 8001));

        ports.release(a);
        let c = ports.allocate(None).unwrap();
        assert_eq!(c, 8002);
    }

    #[test]
    fn held_preferred_port_falls_back_to_scan() {
        let ports = PortAllocator::new(8000);
        ports.allocate(Some(8005)).unwrap();
        let next = ports.allocate(Some(8005)).unwrap();
        assert_ne!(next, 8005);
        assert!(ports.is_held(8005));
        assert!(ports.is_held(next));
    }

    #[test]
    fn scan_skips_ports_held_by_preference() {
        let ports = PortAllocator::new(8000);
        ports.allocate(Some(8000)).unwrap();
        ports.allocate(Some(8002)).unwrap();
        assert_eq!(ports.allocate(None).unwrap(), 8003);
        assert_eq!(ports.allocate(Some(8001)).unwrap(), 8001);
    }

    #[test]
    fn release_is_idempotent() {
        let ports = PortAllocator::default();
        let p = ports.allocate(None).unwrap();
        ports.release(p);
        ports.release(p);
        ports.release(9999);
        assert_eq!(ports.held_count(), 0);
    }

    #[test]
    fn scan_wraps_when_the_top_is_reached() {
        let ports = PortAllocator::new(u16::MAX - 1);
        assert_eq!(ports.allocate(None).unwrap(), u16::MAX - 1);
        assert_eq!(ports.allocate(None).unwrap(), u16::MAX);
        ports.release(u16::MAX - 1);
        assert_eq!(ports.allocate(None).unwrap(), u16::MAX - 1);
        assert!(ports.allocate(None).is_err());
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let ports = Arc::new(PortAllocator::new(8000));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ports = Arc::clone(&ports);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    for j in 0..50 {
                        let p = ports.allocate(None).unwrap();
                        got.push(p);
                        if (i + j) % 3 == 0 {
                            ports.release(p);
                            got.pop();
                        }
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<u16> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "a held port was granted twice");
        assert_eq!(ports.held_count(), total);
    }
}
