// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::resource::SoftTexture;
use super::{SoftDevice, SoftQueue};
use crate::gpu::{
    Device, Format, PresentError, PresentSurface, TextureDesc, TextureUsage,
};

/**
A headless swap chain with `buffer_count` back buffers.

Presenting rotates the current index.  The presented texture must be in
[crate::gpu::ResourceState::Present] by the time the queue reaches the present.
*/
#[derive(Debug)]
pub struct SoftSurface {
    device: SoftDevice,
    buffers: Vec<SoftTexture>,
    index: usize,
    width: u32,
    height: u32,
    format: Format,
}

impl SoftSurface {
    pub fn new(
        device: &SoftDevice,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> Result<Self, PresentError> {
        if buffer_count == 0 {
            return Err(PresentError::Surface("a surface needs at least one buffer".to_string()));
        }
        let format = Format::Bgra8Unorm;
        let buffers = Self::create_buffers(device, buffer_count, width, height, format)?;
        Ok(SoftSurface {
            device: device.clone(),
            buffers,
            index: 0,
            width,
            height,
            format,
        })
    }

    fn create_buffers(
        device: &SoftDevice,
        count: usize,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<Vec<SoftTexture>, PresentError> {
        (0..count)
            .map(|i| {
                let desc = TextureDesc {
                    label: format!("back_buffer_{i}"),
                    width,
                    height,
                    format,
                    usage: TextureUsage::RenderTarget,
                };
                device.create_texture(&desc).map_err(PresentError::from)
            })
            .collect()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl PresentSurface<SoftDevice> for SoftSurface {
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn current_index(&self) -> usize {
        self.index
    }

    fn back_buffer(&self, index: usize) -> Result<SoftTexture, PresentError> {
        self.buffers
            .get(index)
            .cloned()
            .ok_or(PresentError::NoSuchBuffer(index))
    }

    fn format(&self) -> Format {
        self.format
    }

    fn present(
        &mut self,
        queue: &SoftQueue,
        _sync_interval: u32,
        _allow_tear: bool,
    ) -> Result<(), PresentError> {
        if let Some(reason) = self.device.removal_reason() {
            return Err(PresentError::DeviceLost(reason));
        }
        queue.enqueue_present(self.buffers[self.index].clone())?;
        self.index = (self.index + 1) % self.buffers.len();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), PresentError> {
        if self.buffers.iter().any(|b| b.holders() > 1) {
            return Err(PresentError::BackBuffersInUse);
        }
        self.buffers =
            Self::create_buffers(&self.device, self.buffers.len(), width, height, self.format)?;
        self.index = 0;
        self.width = width;
        self.height = height;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_refuses_while_buffers_are_held() {
        let device = SoftDevice::new();
        let mut surface = SoftSurface::new(&device, 2, 8, 8).unwrap();
        let held = surface.back_buffer(1).unwrap();
        assert!(matches!(
            surface.resize(16, 16),
            Err(PresentError::BackBuffersInUse)
        ));
        drop(held);
        surface.resize(16, 16).unwrap();
        assert_eq!(surface.back_buffer(0).unwrap().width(), 16);
    }

    #[test]
    fn out_of_range_back_buffer() {
        let device = SoftDevice::new();
        let surface = SoftSurface::new(&device, 3, 8, 8).unwrap();
        assert!(matches!(
            surface.back_buffer(3),
            Err(PresentError::NoSuchBuffer(3))
        ));
    }
}
