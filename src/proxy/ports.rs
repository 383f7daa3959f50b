//! Local forwarding port leases
//!
//! Each in-flight probe binds its tunnel's SOCKS inbound to its own port.
//! The allocator holds one port per concurrency slot and hands each out to
//! at most one probe at a time.

use crate::error::ProbeError;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct PortAllocator {
    free: Arc<Mutex<Vec<u16>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl PortAllocator {
    /// Ports `base_port .. base_port + slots`, truncated at 65535
    pub fn new(base_port: u16, slots: usize) -> Self {
        let ports: Vec<u16> = (0..slots)
            .filter_map(|i| u16::try_from(i).ok().and_then(|i| base_port.checked_add(i)))
            .rev()
            .collect();
        let capacity = ports.len();

        Self {
            free: Arc::new(Mutex::new(ports)),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free port
    pub async fn acquire(&self) -> Result<PortLease, ProbeError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ProbeError::ProcessLifecycle("port pool closed".to_string()))?;

        let port = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or_else(|| ProbeError::ProcessLifecycle("port pool exhausted".to_string()))?;

        Ok(PortLease {
            port,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }
}

/// A port held by one probe; returned to the pool on drop
pub struct PortLease {
    port: u16,
    free: Arc<Mutex<Vec<u16>>>,
    _permit: OwnedSemaphorePermit,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.port);
    }
}
