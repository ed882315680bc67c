use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Where combiner-network training runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// Data-parallel replicas: each minibatch is sharded across `replicas` threads.
    Accelerated { replicas: usize },
}

impl Device {
    pub fn replicas(self) -> usize {
        match self {
            Device::Cpu => 1,
            Device::Accelerated { replicas } => replicas,
        }
    }
}

fn hardware_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// A device plus the lock that serializes every fit and predict running on it.
///
/// Share one context between models with `Arc<DeviceContext>` to keep them from
/// using the device concurrently.
#[derive(Debug)]
pub struct DeviceContext {
    device: Device,
    lock: Mutex<()>,
}

impl DeviceContext {
    pub fn cpu() -> Self {
        Self::with_device(Device::Cpu)
    }

    /// Data-parallel training on `replicas` threads. Fewer than two replicas is a CPU context.
    pub fn accelerated(replicas: usize) -> Self {
        if replicas < 2 {
            return Self::cpu();
        }
        Self::with_device(Device::Accelerated { replicas })
    }

    /// Resolve the `gpu` flag against the hardware: one replica per hardware
    /// thread, falling back to the CPU device when only one thread exists.
    pub fn from_request(gpu: bool) -> Self {
        if !gpu {
            return Self::cpu();
        }
        let threads = hardware_threads();
        if threads < 2 {
            warn!(threads, "accelerated device requested but unavailable, falling back to CPU");
            return Self::cpu();
        }
        Self::accelerated(threads)
    }

    fn with_device(device: Device) -> Self {
        DeviceContext {
            device,
            lock: Mutex::new(()),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Hold the device for the lifetime of the guard.
    pub(crate) fn acquire(&self) -> MutexGuard<'_, ()> {
        // Nothing to repair behind a poisoned `()` lock.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::cpu()
    }
}
