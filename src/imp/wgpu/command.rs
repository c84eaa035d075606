// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{WgpuBuffer, WgpuDevice, WgpuTexture};
use crate::gpu::{CommandList, DeviceError, Footprint, QueueClass, ResourceState, permitted_on};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/**
A command encoder that can be reset and reused.

wgpu tracks resource states itself, so [CommandList::transition] only checks that the state is
legal for the list's class.
*/
#[derive(Debug)]
pub struct WgpuCommandList {
    device: WgpuDevice,
    class: QueueClass,
    label: String,
    encoder: Option<wgpu::CommandEncoder>,
    finished: Mutex<Option<wgpu::CommandBuffer>>,
    in_flight: Arc<AtomicUsize>,
}

impl WgpuCommandList {
    pub(super) fn new(device: WgpuDevice, class: QueueClass, label: &str) -> Self {
        let encoder = Self::encoder_on(&device, label);
        WgpuCommandList {
            device,
            class,
            label: label.to_string(),
            encoder: Some(encoder),
            finished: Mutex::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn encoder_on(device: &WgpuDevice, label: &str) -> wgpu::CommandEncoder {
        device
            .raw()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(super) fn take_finished(&self) -> Option<wgpu::CommandBuffer> {
        self.finished.lock().unwrap().take()
    }

    pub(super) fn begin_flight(&self) -> Arc<AtomicUsize> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.in_flight.clone()
    }

    fn recording(&mut self, what: &str) -> Option<&mut wgpu::CommandEncoder> {
        if self.encoder.is_none() {
            logwise::error_sync!(
                "{label}: {what} recorded into a closed list",
                label = self.label.clone(),
                what = what.to_string()
            );
        }
        self.encoder.as_mut()
    }
}

impl CommandList<WgpuDevice> for WgpuCommandList {
    fn class(&self) -> QueueClass {
        self.class
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            return Err(DeviceError::Validation(format!(
                "{}: reset while the GPU is still executing it",
                self.label
            )));
        }
        self.finished.lock().unwrap().take();
        self.encoder = Some(Self::encoder_on(&self.device, &self.label));
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        source: &WgpuBuffer,
        footprint: &Footprint,
        dest: &WgpuTexture,
    ) {
        let Some(encoder) = self.recording("copy") else {
            return;
        };
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: source.raw(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: footprint.offset,
                    bytes_per_row: Some(footprint.row_pitch),
                    rows_per_image: Some(footprint.rows),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: dest.raw(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: footprint.width,
                height: footprint.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn transition(&mut self, texture: &WgpuTexture, before: ResourceState, after: ResourceState) {
        if !permitted_on(self.class, after) {
            logwise::error_sync!(
                "{label}: {after} is not legal on a {class} list",
                label = self.label.clone(),
                after = logwise::privacy::LogIt(&after),
                class = logwise::privacy::LogIt(&self.class)
            );
            return;
        }
        logwise::trace_sync!(
            "{texture}: {before} -> {after}",
            texture = texture.desc().label.clone(),
            before = logwise::privacy::LogIt(&before),
            after = logwise::privacy::LogIt(&after)
        );
    }

    fn clear(&mut self, target: &WgpuTexture, color: [f32; 4]) {
        if self.class != QueueClass::Graphics {
            logwise::error_sync!(
                "{label}: clear recorded on a non-graphics list",
                label = self.label.clone()
            );
            return;
        }
        let Some(encoder) = self.recording("clear") else {
            return;
        };
        let view = target.raw().create_view(&wgpu::TextureViewDescriptor::default());
        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: color[0] as f64,
                        g: color[1] as f64,
                        b: color[2] as f64,
                        a: color[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        drop(pass);
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| DeviceError::Validation(format!("{}: closed twice", self.label)))?;
        *self.finished.lock().unwrap() = Some(encoder.finish());
        Ok(())
    }
}
