// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::gpu::{DeviceError, PresentError};

/// Failures setting up the wgpu backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("No such adapter")]
    NoSuchAdapter,
    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("Surface not supported by the adapter")]
    UnsupportedSurface,
    #[error("Can't spawn wgpu poll thread: {0}")]
    PollThread(#[source] std::io::Error),
}

impl From<Error> for DeviceError {
    fn from(e: Error) -> Self {
        DeviceError::Backend(e.to_string())
    }
}

impl From<Error> for PresentError {
    fn from(e: Error) -> Self {
        PresentError::Surface(e.to_string())
    }
}

impl From<wgpu::SurfaceError> for PresentError {
    fn from(e: wgpu::SurfaceError) -> Self {
        match e {
            wgpu::SurfaceError::Lost => PresentError::DeviceLost(e.to_string()),
            other => PresentError::Surface(other.to_string()),
        }
    }
}
