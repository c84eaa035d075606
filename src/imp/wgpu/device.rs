// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::resource::{wgpu_format, wgpu_usage};
use super::{
    EntryPoint, Error, WgpuBuffer, WgpuCommandList, WgpuFence, WgpuQueue, WgpuTexture, WgpuView,
};
use crate::gpu::{
    Device, DeviceError, Footprint, Format, QueueClass, TextureDesc, ViewKind,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use wgpu::{Limits, PollType, Trace};

#[derive(Debug)]
struct DeviceResources {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
    lost: Arc<Mutex<Option<String>>>,
    poll_thread: Option<JoinHandle<()>>,
    poll_shutdown: Arc<AtomicBool>,
    poll_trigger: Sender<()>,
}

/**
A wgpu device and its queue.

wgpu exposes one queue per device, so every [WgpuQueue] submits to it regardless of class.
Completion callbacks fire when the device is polled, which a background thread does whenever
[WgpuDevice::set_needs_poll] is called.
*/
#[derive(Debug, Clone)]
pub struct WgpuDevice {
    resources: Arc<DeviceResources>,
}

impl WgpuDevice {
    /// Picks an adapter (compatible with `compatible_surface`, if given) and opens a device on it.
    pub async fn bind(
        entry_point: &EntryPoint,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, Error> {
        let options = wgpu::RequestAdapterOptions {
            power_preference: Default::default(),
            force_fallback_adapter: false,
            compatible_surface,
        };
        let adapter = entry_point
            .instance()
            .request_adapter(&options)
            .await
            .map_err(|_| Error::NoSuchAdapter)?;
        let mut limits = Limits::downlevel_defaults();
        limits.max_texture_dimension_2d = adapter.limits().max_texture_dimension_2d;
        let descriptor = wgpu::DeviceDescriptor {
            label: Some("framestream device"),
            required_features: Default::default(),
            required_limits: limits,
            memory_hints: Default::default(),
            trace: Trace::Off,
        };
        let (device, queue) = adapter.request_device(&descriptor).await?;
        logwise::info_sync!(
            "bound device on {adapter}",
            adapter = adapter.get_info().name
        );
        Self::from_parts(adapter, device, queue)
    }

    /// [Self::bind], blocking the calling thread.
    pub fn bind_blocking(
        entry_point: &EntryPoint,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, Error> {
        test_executors::sleep_on(Self::bind(entry_point, compatible_surface))
    }

    fn from_parts(
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
    ) -> Result<Self, Error> {
        let lost = Arc::new(Mutex::new(None));
        let move_lost = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            logwise::error_sync!(
                "device lost ({reason}): {message}",
                reason = logwise::privacy::LogIt(&reason),
                message = message.clone()
            );
            *move_lost.lock().unwrap() = Some(message);
        });

        let poll_device = device.clone();
        let poll_shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = poll_shutdown.clone();
        let (poll_trigger, poll_receiver): (Sender<()>, Receiver<()>) = mpsc::channel();
        let poll_thread = thread::Builder::new()
            .name("wgpu_poll".to_string())
            .spawn(move || {
                while poll_receiver.recv().is_ok() {
                    if shutdown_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    //runs every callback whose work is done
                    if let Err(e) = poll_device.poll(PollType::Wait) {
                        logwise::warn_sync!("wgpu poll failed: {e}", e = logwise::privacy::LogIt(&e));
                    }
                }
            })
            .map_err(Error::PollThread)?;
        Ok(WgpuDevice {
            resources: Arc::new(DeviceResources {
                device,
                queue,
                adapter,
                lost,
                poll_thread: Some(poll_thread),
                poll_shutdown,
                poll_trigger,
            }),
        })
    }

    /// Signal the polling thread that GPU work may be ready
    pub fn set_needs_poll(&self) {
        let _ = self.resources.poll_trigger.send(());
    }

    pub fn raw(&self) -> &wgpu::Device {
        &self.resources.device
    }

    pub(super) fn queue(&self) -> &wgpu::Queue {
        &self.resources.queue
    }

    pub(super) fn adapter(&self) -> &wgpu::Adapter {
        &self.resources.adapter
    }

    pub(super) fn check_removed(&self) -> Result<(), DeviceError> {
        match self.removal_reason() {
            Some(reason) => Err(DeviceError::Removed(reason)),
            None => Ok(()),
        }
    }
}

impl Device for WgpuDevice {
    type Texture = WgpuTexture;
    type Buffer = WgpuBuffer;
    type View = WgpuView;
    type Fence = WgpuFence;
    type Queue = WgpuQueue;
    type CommandList = WgpuCommandList;

    fn create_fence(&self, initial_value: u64) -> Result<WgpuFence, DeviceError> {
        self.check_removed()?;
        Ok(WgpuFence::new(self.clone(), initial_value))
    }

    fn create_queue(&self, class: QueueClass, label: &str) -> Result<WgpuQueue, DeviceError> {
        self.check_removed()?;
        Ok(WgpuQueue::new(self.clone(), class, label))
    }

    fn create_command_list(
        &self,
        class: QueueClass,
        label: &str,
    ) -> Result<WgpuCommandList, DeviceError> {
        self.check_removed()?;
        Ok(WgpuCommandList::new(self.clone(), class, label))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<WgpuTexture, DeviceError> {
        self.check_removed()?;
        let max = self.raw().limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(DeviceError::Validation(format!(
                "{}: {}x{} is outside 1..={max}",
                desc.label, desc.width, desc.height
            )));
        }
        let texture = self.raw().create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage: wgpu_usage(desc.usage),
            view_formats: &[],
        });
        Ok(WgpuTexture::new(texture, desc.clone()))
    }

    fn create_upload_buffer(&self, size: u64, label: &str) -> Result<WgpuBuffer, DeviceError> {
        self.check_removed()?;
        if size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(DeviceError::Validation(format!(
                "{label}: size {size} is not a multiple of {}",
                wgpu::COPY_BUFFER_ALIGNMENT
            )));
        }
        if size > self.raw().limits().max_buffer_size {
            return Err(DeviceError::OutOfMemory {
                what: label.to_string(),
                bytes: size,
            });
        }
        let buffer = self.raw().create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Ok(WgpuBuffer::new(buffer, size))
    }

    fn create_view(&self, texture: &WgpuTexture, kind: ViewKind) -> Result<WgpuView, DeviceError> {
        let depth = texture.desc().format == Format::Depth32Float;
        if depth != (kind == ViewKind::DepthStencil) {
            return Err(DeviceError::Validation(format!(
                "{}: {kind:?} view of a {:?} texture",
                texture.desc().label,
                texture.desc().format
            )));
        }
        Ok(WgpuView::new(texture, kind))
    }

    fn copyable_footprint(&self, desc: &TextureDesc) -> Result<Footprint, DeviceError> {
        Footprint::placed(
            desc.width,
            desc.height,
            desc.format,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
        )
        .ok_or_else(|| {
            DeviceError::Validation(format!(
                "{}: {}x{} footprint overflows",
                desc.label, desc.width, desc.height
            ))
        })
    }

    fn map_write<R>(
        &self,
        buffer: &WgpuBuffer,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, DeviceError> {
        self.check_removed()?;
        let map = logwise::perfwarn_begin!("WgpuDevice::map_write");
        let slice = buffer.raw().slice(..);
        let (sender, mapped) = r#continue::continuation();
        slice.map_async(wgpu::MapMode::Write, move |result| {
            sender.send(result);
        });
        //mapping waits for any submitted copy still reading the buffer
        self.raw()
            .poll(PollType::Wait)
            .map_err(|e| DeviceError::Map(e.to_string()))?;
        test_executors::sleep_on(mapped).map_err(|e| DeviceError::Map(e.to_string()))?;
        let result = {
            let mut view = slice.get_mapped_range_mut();
            f(&mut view)
        };
        buffer.raw().unmap();
        drop(map);
        Ok(result)
    }

    fn removal_reason(&self) -> Option<String> {
        self.resources.lost.lock().unwrap().clone()
    }
}

impl Drop for DeviceResources {
    fn drop(&mut self) {
        self.poll_shutdown.store(true, Ordering::Relaxed);
        //wake the thread so it sees the flag
        let _ = self.poll_trigger.send(());
        if let Some(handle) = self.poll_thread.take() {
            let _ = handle.join();
        }
    }
}
