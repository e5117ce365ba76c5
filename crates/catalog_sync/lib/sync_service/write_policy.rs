//! Device-aware write sizing.
//!
//! Small devices stall when a single write holds the store lock for long, so every chunk of a
//! batched write asks the [`DeviceClassProvider`] again and sizes itself with [`batch_size_for`].

use std::fmt;
use std::str::FromStr;

use catalog_core::ScanPhase;
use sysinfo::System;

/// Chunk size used on constrained devices, whatever the phase.
pub const CONSTRAINED_BATCH_SIZE: usize = 35;

/// Devices reporting less total memory than this are treated as constrained.
pub const DEFAULT_CONSTRAINED_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Constrained,
    Normal,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constrained => "constrained",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "constrained" | "low" => Ok(Self::Constrained),
            "normal" => Ok(Self::Normal),
            other => Err(format!("unknown device class `{other}`")),
        }
    }
}

pub fn batch_size_for(device_class: DeviceClass, phase: ScanPhase) -> usize {
    match device_class {
        DeviceClass::Constrained => CONSTRAINED_BATCH_SIZE,
        DeviceClass::Normal => match phase {
            ScanPhase::Live => 500,
            ScanPhase::Movies => 400,
            ScanPhase::Episodes => 300,
            ScanPhase::Series => 150,
        },
    }
}

/// Answers "what kind of device are we on right now"; queried per chunk, never cached.
pub trait DeviceClassProvider: Send + Sync {
    fn current_device_class(&self) -> DeviceClass;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDeviceClass(pub DeviceClass);

impl DeviceClassProvider for FixedDeviceClass {
    fn current_device_class(&self) -> DeviceClass {
        self.0
    }
}

/// Classifies the host by its total physical memory, read fresh through `sysinfo` on every query.
#[derive(Debug, Clone, Copy)]
pub struct SystemMemoryDeviceClass {
    constrained_below_bytes: u64,
}

impl SystemMemoryDeviceClass {
    pub fn new(constrained_below_bytes: u64) -> Self {
        Self {
            constrained_below_bytes,
        }
    }
}

impl Default for SystemMemoryDeviceClass {
    fn default() -> Self {
        Self::new(DEFAULT_CONSTRAINED_MEMORY_BYTES)
    }
}

impl DeviceClassProvider for SystemMemoryDeviceClass {
    fn current_device_class(&self) -> DeviceClass {
        let mut system = System::new();
        system.refresh_memory();
        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            tracing::debug!(
                event = "device_memory_unreported",
                "total memory unavailable; assuming constrained device"
            );
        }
        classify_total_memory(total_bytes, self.constrained_below_bytes)
    }
}

/// Zero means the platform reported nothing, which counts as constrained.
fn classify_total_memory(total_bytes: u64, constrained_below_bytes: u64) -> DeviceClass {
    if total_bytes >= constrained_below_bytes && total_bytes > 0 {
        DeviceClass::Normal
    } else {
        DeviceClass::Constrained
    }
}

/// Length of the next chunk given what is left to write and the current policy size.
pub fn next_chunk_len(remaining: usize, policy_size: usize) -> usize {
    remaining.min(policy_size.max(1))
}
