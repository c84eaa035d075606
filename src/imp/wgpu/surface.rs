// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::resource::color_format_from_wgpu;
use super::{Error, WgpuDevice, WgpuQueue, WgpuTexture};
use crate::gpu::{
    Device, Format, PresentError, PresentSurface, Queue, QueueClass, TextureDesc, TextureUsage,
};

/// The present mode for a sync interval, falling back to vsync when the surface lacks it.
fn present_mode(
    sync_interval: u32,
    allow_tear: bool,
    supported: &[wgpu::PresentMode],
) -> wgpu::PresentMode {
    let wanted = match (sync_interval, allow_tear) {
        (0, true) => wgpu::PresentMode::Immediate,
        (0, false) => wgpu::PresentMode::Mailbox,
        _ => wgpu::PresentMode::Fifo,
    };
    if supported.contains(&wanted) {
        wanted
    } else {
        wgpu::PresentMode::Fifo
    }
}

/**
A window surface with a ring of back buffers.

wgpu hands out one swapchain texture at a time, so frames render into our own back buffers and
[PresentSurface::present] copies the current one into the swapchain texture before presenting.
*/
#[derive(Debug)]
pub struct WgpuSurface {
    surface: wgpu::Surface<'static>,
    device: WgpuDevice,
    config: wgpu::SurfaceConfiguration,
    present_modes: Vec<wgpu::PresentMode>,
    format: Format,
    buffers: Vec<WgpuTexture>,
    index: usize,
}

impl WgpuSurface {
    pub fn new(
        device: &WgpuDevice,
        surface: wgpu::Surface<'static>,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> Result<Self, PresentError> {
        if buffer_count == 0 || width == 0 || height == 0 {
            return Err(PresentError::Surface(format!(
                "{buffer_count} buffers of {width}x{height}"
            )));
        }
        let capabilities = surface.get_capabilities(device.adapter());
        let (surface_format, format) = capabilities
            .formats
            .iter()
            .find_map(|f| color_format_from_wgpu(*f).map(|ours| (*f, ours)))
            .ok_or(Error::UnsupportedSurface)?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
            format: surface_format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: buffer_count as u32,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        surface.configure(device.raw(), &config);
        let buffers = Self::create_buffers(device, buffer_count, width, height, format)?;
        logwise::info_sync!(
            "surface {w}x{h} {format} with {n} buffers",
            w = width,
            h = height,
            format = logwise::privacy::LogIt(&format),
            n = buffer_count
        );
        Ok(WgpuSurface {
            surface,
            device: device.clone(),
            config,
            present_modes: capabilities.present_modes,
            format,
            buffers,
            index: 0,
        })
    }

    fn create_buffers(
        device: &WgpuDevice,
        count: usize,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<Vec<WgpuTexture>, PresentError> {
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

    fn acquire(&mut self) -> Result<wgpu::SurfaceTexture, PresentError> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Outdated) => {
                logwise::warn_sync!("surface outdated; reconfiguring");
                self.surface.configure(self.device.raw(), &self.config);
                Ok(self.surface.get_current_texture()?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl PresentSurface<WgpuDevice> for WgpuSurface {
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn current_index(&self) -> usize {
        self.index
    }

    fn back_buffer(&self, index: usize) -> Result<WgpuTexture, PresentError> {
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
        queue: &WgpuQueue,
        sync_interval: u32,
        allow_tear: bool,
    ) -> Result<(), PresentError> {
        if let Some(reason) = self.device.removal_reason() {
            return Err(PresentError::DeviceLost(reason));
        }
        if queue.class() != QueueClass::Graphics {
            return Err(PresentError::Surface(format!(
                "present on {:?} queue {}",
                queue.class(),
                queue.label()
            )));
        }
        let mode = present_mode(sync_interval, allow_tear, &self.present_modes);
        if mode != self.config.present_mode {
            self.config.present_mode = mode;
            self.surface.configure(self.device.raw(), &self.config);
        }
        let frame = self.acquire()?;
        let back = &self.buffers[self.index];
        let mut encoder =
            self.device
                .raw()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("present blit"),
                });
        encoder.copy_texture_to_texture(
            back.raw().as_image_copy(),
            frame.texture.as_image_copy(),
            wgpu::Extent3d {
                width: self.config.width,
                height: self.config.height,
                depth_or_array_layers: 1,
            },
        );
        self.device.queue().submit(std::iter::once(encoder.finish()));
        frame.present();
        self.device.set_needs_poll();
        self.index = (self.index + 1) % self.buffers.len();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), PresentError> {
        if width == 0 || height == 0 {
            return Err(PresentError::Surface(format!("can't resize to {width}x{height}")));
        }
        if self.buffers.iter().any(|b| b.holders() > 1) {
            return Err(PresentError::BackBuffersInUse);
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(self.device.raw(), &self.config);
        self.buffers =
            Self::create_buffers(&self.device, self.buffers.len(), width, height, self.format)?;
        self.index = 0;
        Ok(())
    }
}
