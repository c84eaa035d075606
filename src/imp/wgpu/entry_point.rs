// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::Error;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// The wgpu instance everything else is created from.
#[derive(Debug, Clone)]
pub struct EntryPoint(pub(super) wgpu::Instance);

impl EntryPoint {
    /// Backends and flags come from the `WGPU_*` environment variables when set.
    pub fn new() -> Self {
        let descriptor = wgpu::InstanceDescriptor::from_env_or_default();
        EntryPoint(wgpu::Instance::new(&descriptor))
    }

    /// Creates a surface for `window`, which is kept alive as long as the surface.
    pub fn create_surface<W>(&self, window: Arc<W>) -> Result<wgpu::Surface<'static>, Error>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        Ok(self.0.create_surface(window)?)
    }

    pub(super) fn instance(&self) -> &wgpu::Instance {
        &self.0
    }
}

impl Default for EntryPoint {
    fn default() -> Self {
        Self::new()
    }
}
