//! Host introspection: memory pressure sampling and identification.

use std::sync::Mutex;
use sysinfo::System;

/// Samples memory usage so long-running work can back off under pressure.
pub trait MemoryProbe: Send + Sync {
    /// Current memory usage as a percentage in `0.0..=100.0`.
    fn usage_percent(&self) -> f32;

    /// Ask the platform to release what it can before work continues.
    fn relieve(&self) {}
}

/// [`MemoryProbe`] backed by `sysinfo` system-wide memory statistics.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    /// Create a probe with an empty sampling cache.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn usage_percent(&self) -> f32 {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        (system.used_memory() as f64 / total as f64 * 100.0) as f32
    }

    fn relieve(&self) {
        // The cached snapshot is the only allocation this probe owns.
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *system = System::new();
    }
}

/// Hostname of the machine running the server, or `"unknown"`.
pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
