// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Software device.

Each [SoftQueue] owns a worker thread that executes submitted command lists in order.  Fences
complete when the worker reaches the signal.  Protocol violations (barriers naming the wrong
before-state, resetting a list the GPU is still executing, mapping a buffer a pending copy reads
from, non-copy states on a copy queue) are logged and kept in [SoftDevice::violations].
*/

mod command;
mod fence;
mod queue;
mod resource;
mod surface;

pub use command::SoftCommandList;
pub use fence::SoftFence;
pub use queue::SoftQueue;
pub use resource::{SoftBuffer, SoftTexture, SoftView};
pub use surface::SoftSurface;

use crate::gpu::{
    Device, DeviceError, Footprint, Format, QueueClass, ROW_PITCH_ALIGNMENT, TextureDesc,
    ViewKind,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Largest texture edge the software device accepts.
pub const MAX_TEXTURE_DIMENSION: u32 = 16384;

#[derive(Debug, Default)]
pub(crate) struct Shared {
    violations: Mutex<Vec<String>>,
    removed: Mutex<Option<String>>,
    latency: Mutex<Duration>,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn violation(&self, message: String) {
        logwise::error_sync!("soft device validation: {message}", message = message.clone());
        self.violations.lock().unwrap().push(message);
    }

    pub(crate) fn removed(&self) -> Option<String> {
        self.removed.lock().unwrap().clone()
    }

    fn check_removed(&self) -> Result<(), DeviceError> {
        match self.removed() {
            Some(reason) => Err(DeviceError::Removed(reason)),
            None => Ok(()),
        }
    }

    pub(crate) fn latency(&self) -> Duration {
        *self.latency.lock().unwrap()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/**
A software device.

Clones share the same device.
*/
#[derive(Debug, Clone, Default)]
pub struct SoftDevice {
    shared: Arc<Shared>,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artificial delay before each submitted command list executes.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock().unwrap() = latency;
    }

    /// Violations recorded so far.
    pub fn violations(&self) -> Vec<String> {
        self.shared.violations.lock().unwrap().clone()
    }

    /// Simulates device removal.  Queues stop executing, waits and presents fail.
    pub fn lose(&self, reason: &str) {
        logwise::warn_sync!("soft device lost: {reason}", reason = reason.to_string());
        *self.shared.removed.lock().unwrap() = Some(reason.to_string());
    }
}

impl Device for SoftDevice {
    type Texture = SoftTexture;
    type Buffer = SoftBuffer;
    type View = SoftView;
    type Fence = SoftFence;
    type Queue = SoftQueue;
    type CommandList = SoftCommandList;

    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence, DeviceError> {
        self.shared.check_removed()?;
        Ok(SoftFence::new(initial_value, self.shared.clone()))
    }

    fn create_queue(&self, class: QueueClass, label: &str) -> Result<Self::Queue, DeviceError> {
        self.shared.check_removed()?;
        SoftQueue::new(class, label, self.shared.clone())
    }

    fn create_command_list(
        &self,
        class: QueueClass,
        label: &str,
    ) -> Result<Self::CommandList, DeviceError> {
        self.shared.check_removed()?;
        Ok(SoftCommandList::new(class, label, self.shared.clone()))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, DeviceError> {
        self.shared.check_removed()?;
        if desc.width == 0
            || desc.height == 0
            || desc.width > MAX_TEXTURE_DIMENSION
            || desc.height > MAX_TEXTURE_DIMENSION
        {
            return Err(DeviceError::Validation(format!(
                "texture {} has unsupported extent {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        Ok(SoftTexture::new(self.shared.next_id(), desc.clone()))
    }

    fn create_upload_buffer(&self, size: u64, label: &str) -> Result<Self::Buffer, DeviceError> {
        self.shared.check_removed()?;
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory {
            what: label.to_string(),
            bytes: size,
        })?;
        Ok(SoftBuffer::new(self.shared.next_id(), label, len))
    }

    fn create_view(
        &self,
        texture: &Self::Texture,
        kind: ViewKind,
    ) -> Result<Self::View, DeviceError> {
        self.shared.check_removed()?;
        let is_depth = texture.format() == Format::Depth32Float;
        if (kind == ViewKind::DepthStencil) != is_depth {
            return Err(DeviceError::Validation(format!(
                "{kind:?} view doesn't match format {:?} of {}",
                texture.format(),
                texture.label()
            )));
        }
        Ok(SoftView::new(texture.clone(), kind))
    }

    fn copyable_footprint(&self, desc: &TextureDesc) -> Result<Footprint, DeviceError> {
        Footprint::placed(desc.width, desc.height, desc.format, ROW_PITCH_ALIGNMENT).ok_or_else(
            || {
                DeviceError::Validation(format!(
                    "footprint of {}x{} overflows",
                    desc.width, desc.height
                ))
            },
        )
    }

    fn map_write<R>(
        &self,
        buffer: &Self::Buffer,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, DeviceError> {
        self.shared.check_removed()?;
        if buffer.pending_reads() > 0 {
            let message = format!(
                "buffer {} mapped for writing while a copy out of it is pending",
                buffer.label()
            );
            self.shared.violation(message.clone());
            return Err(DeviceError::Validation(message));
        }
        Ok(buffer.with_bytes(f))
    }

    fn removal_reason(&self) -> Option<String> {
        self.shared.removed()
    }
}
