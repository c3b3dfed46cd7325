use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::allocator::{Allocator, CpuAllocator};
use crate::error::{Error, InvalidDeviceSnafu, Result, UnregisteredDeviceSnafu};

/// Target device a program is compiled for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceSpec {
    Cpu,
    Cuda { device_id: usize },
}

impl DeviceSpec {
    /// Canonical device string, e.g. `CPU` or `CUDA:1`.
    pub fn canonicalize(&self) -> String {
        self.to_string()
    }

    /// Accelerator targets emit a second, low-level device text (PTX) next
    /// to the kernel source.
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda { .. })
    }

    /// Device family without the ordinal, used to key lowering strategies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda { .. } => "CUDA",
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "CPU"),
            Self::Cuda { device_id } => write!(f, "CUDA:{device_id}"),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    /// Parse a device string.
    ///
    /// - "CPU" -> DeviceSpec::Cpu
    /// - "CUDA:1" -> DeviceSpec::Cuda { device_id: 1 }
    /// - "cuda" -> DeviceSpec::Cuda { device_id: 0 }
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_uppercase();
        let (kind, ordinal) = match upper.split_once(':') {
            Some((kind, ordinal)) => (kind, Some(ordinal)),
            None => (upper.as_str(), None),
        };

        match (kind, ordinal) {
            ("CPU", None) => Ok(Self::Cpu),
            ("CUDA" | "GPU", None) => Ok(Self::Cuda { device_id: 0 }),
            ("CUDA" | "GPU", Some(ordinal)) => {
                let device_id = ordinal.parse().map_err(|_| Error::InvalidDevice { device: s.to_string() })?;
                Ok(Self::Cuda { device_id })
            }
            _ => InvalidDeviceSnafu { device: s }.fail(),
        }
    }
}

/// Allocators per device.
///
/// The CPU allocator is created on demand; every other device must be
/// registered by the embedding application before buffers are allocated
/// on it.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceSpec, Arc<dyn Allocator>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { devices: RwLock::new(HashMap::new()) }
    }

    /// Install (or replace) the allocator used for `spec`.
    pub fn register(&self, spec: DeviceSpec, allocator: Arc<dyn Allocator>) {
        self.devices.write().insert(spec, allocator);
    }

    /// Get or create a device allocator.
    pub fn get(&self, spec: &DeviceSpec) -> Result<Arc<dyn Allocator>> {
        // Fast path: read lock
        {
            let devices = self.devices.read();
            if let Some(allocator) = devices.get(spec) {
                return Ok(Arc::clone(allocator));
            }
        }

        let mut devices = self.devices.write();

        // Double-check after acquiring write lock
        if let Some(allocator) = devices.get(spec) {
            return Ok(Arc::clone(allocator));
        }

        let allocator: Arc<dyn Allocator> = match spec {
            DeviceSpec::Cpu => Arc::new(CpuAllocator),
            DeviceSpec::Cuda { .. } => return UnregisteredDeviceSnafu { device: spec.to_string() }.fail(),
        };
        devices.insert(spec.clone(), Arc::clone(&allocator));
        Ok(allocator)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<DeviceRegistry> = Lazy::new(DeviceRegistry::new);

/// Get the global device registry.
pub fn registry() -> &'static DeviceRegistry {
    &REGISTRY
}
