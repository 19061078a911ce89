//! Compute device selection from a [`DevicePreference`].

use candle_core::Device;
use ctalearn_core::{CtaLearnError, DevicePreference, Result};

/// Resolve a device preference.
///
/// `Auto` tries CUDA (with the `cuda` feature), then Metal (with the `metal`
/// feature), then the CPU. An explicit `Cuda` or `Metal` preference fails
/// when the backend was not compiled in or no device is present.
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda => cuda(),
        DevicePreference::Metal => metal(),
        DevicePreference::Auto => {
            if let Ok(device) = cuda() {
                return Ok(device);
            }
            if let Ok(device) = metal() {
                return Ok(device);
            }
            tracing::debug!("Using CPU device");
            Ok(Device::Cpu)
        }
    }
}

fn cuda() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                tracing::info!("Using CUDA device 0");
                Ok(device)
            }
            Err(e) => {
                tracing::warn!("CUDA feature enabled but no GPU available: {e}");
                Err(CtaLearnError::Config(format!("CUDA device 0 unavailable: {e}")))
            }
        }
    }
    #[cfg(not(feature = "cuda"))]
    {
        Err(CtaLearnError::Config(
            "built without the `cuda` feature".to_string(),
        ))
    }
}

fn metal() -> Result<Device> {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                tracing::info!("Using Metal device 0");
                Ok(device)
            }
            Err(e) => {
                tracing::warn!("Metal feature enabled but no device available: {e}");
                Err(CtaLearnError::Config(format!("Metal device 0 unavailable: {e}")))
            }
        }
    }
    #[cfg(not(feature = "metal"))]
    {
        Err(CtaLearnError::Config(
            "built without the `metal` feature".to_string(),
        ))
    }
}
