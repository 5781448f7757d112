// ============================================================
// Layer 3: Device placement
// ============================================================
// DeviceInfo is the serialisable description of where a model
// runs: an optional accelerator id plus an optional process rank.
// It is immutable: changing the accelerator produces a new record
// (`with_cuda`), it is never patched in place.
//
// `Placement` turns that description into a concrete burn device
// for a given backend. Backends without accelerators (NdArray)
// map everything to their single CPU device.

use serde::{Deserialize, Serialize};

use burn::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    cuda: Option<String>,
    rank: Option<usize>,
}

impl DeviceInfo {
    pub fn new(cuda: Option<String>, rank: Option<usize>) -> Self {
        Self { cuda, rank }
    }

    /// Parse a user-facing selector: `None`, `"cpu"`, `"0"`, `"cuda:1"`.
    pub fn from_selector(selector: Option<&str>) -> Self {
        let cuda = selector
            .map(|s| s.trim().trim_start_matches("cuda:").to_string())
            .filter(|s| !s.is_empty() && s != "cpu");
        Self { cuda, rank: None }
    }

    pub fn cuda(&self) -> Option<&str> {
        self.cuda.as_deref()
    }

    pub fn rank(&self) -> Option<usize> {
        self.rank
    }

    /// Whole-record replacement of the accelerator id.
    pub fn with_cuda(&self, cuda: Option<String>) -> Self {
        Self { cuda, rank: self.rank }
    }

    pub fn is_cpu(&self) -> bool {
        self.cuda.is_none()
    }

    /// The logical device handle for backend `B`.
    pub fn device<B: Placement>(&self) -> B::Device {
        B::resolve(self)
    }
}

// ─── Placement ────────────────────────────────────────────────────────────────
/// Maps a [`DeviceInfo`] onto a backend's device type.
pub trait Placement: Backend {
    fn resolve(info: &DeviceInfo) -> Self::Device;

    /// Device used for graph export.
    fn cpu() -> Self::Device;
}

#[cfg(feature = "ndarray")]
mod ndarray_placement {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};

    impl Placement for NdArray {
        fn resolve(info: &DeviceInfo) -> NdArrayDevice {
            if let Some(id) = info.cuda() {
                tracing::debug!("NdArray has no accelerator '{}', using cpu", id);
            }
            NdArrayDevice::Cpu
        }

        fn cpu() -> NdArrayDevice {
            NdArrayDevice::Cpu
        }
    }

    impl Placement for Autodiff<NdArray> {
        fn resolve(info: &DeviceInfo) -> NdArrayDevice {
            <NdArray as Placement>::resolve(info)
        }

        fn cpu() -> NdArrayDevice {
            NdArrayDevice::Cpu
        }
    }
}

#[cfg(feature = "wgpu")]
mod wgpu_placement {
    use super::*;
    use burn::backend::wgpu::WgpuDevice;
    use burn::backend::{Autodiff, Wgpu};

    impl Placement for Wgpu {
        fn resolve(info: &DeviceInfo) -> WgpuDevice {
            match info.cuda().and_then(|id| id.parse::<usize>().ok()) {
                Some(index) => WgpuDevice::DiscreteGpu(index),
                None if info.is_cpu() => WgpuDevice::Cpu,
                None => WgpuDevice::default(),
            }
        }

        fn cpu() -> WgpuDevice {
            WgpuDevice::Cpu
        }
    }

    impl Placement for Autodiff<Wgpu> {
        fn resolve(info: &DeviceInfo) -> WgpuDevice {
            <Wgpu as Placement>::resolve(info)
        }

        fn cpu() -> WgpuDevice {
            WgpuDevice::Cpu
        }
    }
}
