// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::gpu::{Format, TextureDesc, TextureUsage, ViewKind};
use std::sync::Arc;

pub(super) const fn wgpu_format(format: Format) -> wgpu::TextureFormat {
    match format {
        Format::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Format::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        Format::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        Format::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

/// The color format a surface reports, if we have one for it.
pub(super) fn color_format_from_wgpu(format: wgpu::TextureFormat) -> Option<Format> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm => Some(Format::Rgba8Unorm),
        wgpu::TextureFormat::Rgba8UnormSrgb => Some(Format::Rgba8UnormSrgb),
        wgpu::TextureFormat::Bgra8Unorm => Some(Format::Bgra8Unorm),
        _ => None,
    }
}

pub(super) const fn wgpu_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    match usage {
        TextureUsage::Sampled => wgpu::TextureUsages::TEXTURE_BINDING.union(wgpu::TextureUsages::COPY_DST),
        TextureUsage::RenderTarget => wgpu::TextureUsages::RENDER_ATTACHMENT
            .union(wgpu::TextureUsages::COPY_SRC)
            .union(wgpu::TextureUsages::TEXTURE_BINDING),
        TextureUsage::DepthStencil => wgpu::TextureUsages::RENDER_ATTACHMENT,
    }
}

#[derive(Debug)]
struct TextureInner {
    texture: wgpu::Texture,
    desc: TextureDesc,
}

/// A texture and the description it was created from.
#[derive(Debug, Clone)]
pub struct WgpuTexture(Arc<TextureInner>);

impl WgpuTexture {
    pub(super) fn new(texture: wgpu::Texture, desc: TextureDesc) -> Self {
        WgpuTexture(Arc::new(TextureInner { texture, desc }))
    }

    pub fn raw(&self) -> &wgpu::Texture {
        &self.0.texture
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.0.desc
    }

    pub(super) fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// A CPU-writable buffer copies read from.
#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl WgpuBuffer {
    pub(super) fn new(buffer: wgpu::Buffer, size: u64) -> Self {
        WgpuBuffer { buffer, size }
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug, Clone)]
pub struct WgpuView {
    view: wgpu::TextureView,
    texture: WgpuTexture,
    kind: ViewKind,
}

impl WgpuView {
    pub(super) fn new(texture: &WgpuTexture, kind: ViewKind) -> Self {
        let view = texture.raw().create_view(&wgpu::TextureViewDescriptor {
            label: Some(&texture.desc().label),
            ..Default::default()
        });
        WgpuView {
            view,
            texture: texture.clone(),
            kind,
        }
    }

    pub fn raw(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &WgpuTexture {
        &self.texture
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }
}
