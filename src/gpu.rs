// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The device seam.

Everything above this module (fence pacing, resource sets, the trampoline, the loader) is written
against these traits.  A backend supplies a [Device] and its associated queue, command-list, fence,
buffer and texture types, plus a [PresentSurface] when it can display frames.

Two backends ship with the crate, see [crate::imp].
*/

mod state;

pub use state::{post_copy_state, permitted_on};

use std::fmt::Debug;

/// Execution class of a queue or command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueClass {
    /// Can draw, dispatch and copy.
    Graphics,
    /// Can dispatch and copy.
    Compute,
    /// Can only copy.  Resources touched by a copy batch decay to [ResourceState::Common]
    /// when the batch completes.
    Copy,
}

/// Usage state of a texture as seen by barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    CopyDest,
    CopySource,
    ShaderRead,
    RenderTarget,
    Present,
    DepthWrite,
}

/// Pixel formats the pipeline can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Depth32Float,
}

impl Format {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb | Format::Bgra8Unorm => 4,
            Format::Depth32Float => 4,
        }
    }
}

/// What a texture will be used for.
///
/// This also picks the state a freshly created texture starts in: sampled textures start in
/// [ResourceState::CopyDest] so they can be filled immediately, render targets in
/// [ResourceState::Present], depth targets in [ResourceState::DepthWrite].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    Sampled,
    RenderTarget,
    DepthStencil,
}

impl TextureUsage {
    pub const fn initial_state(self) -> ResourceState {
        match self {
            TextureUsage::Sampled => ResourceState::CopyDest,
            TextureUsage::RenderTarget => ResourceState::Present,
            TextureUsage::DepthStencil => ResourceState::DepthWrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn sampled(label: impl Into<String>, width: u32, height: u32, format: Format) -> Self {
        TextureDesc {
            label: label.into(),
            width,
            height,
            format,
            usage: TextureUsage::Sampled,
        }
    }
}

/// Kind of view a resource set creates for its slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil,
    ShaderResource,
}

/// Row pitch alignment both backends use for buffer/texture copies.
pub const ROW_PITCH_ALIGNMENT: u32 = 256;

/**
Layout of a 2D image inside a linear buffer, as the device wants it for a buffer-to-texture copy.

Rows are `row_pitch` bytes apart; only the first `row_size` bytes of each row carry pixels.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub offset: u64,
    pub row_pitch: u32,
    pub rows: u32,
    pub row_size: u32,
    pub total_bytes: u64,
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

impl Footprint {
    /// Computes a placed footprint at offset zero with rows aligned to `alignment`.
    ///
    /// Returns `None` if the layout does not fit in the address space.
    pub fn placed(width: u32, height: u32, format: Format, alignment: u32) -> Option<Footprint> {
        let row_size = width.checked_mul(format.bytes_per_pixel())?;
        let row_pitch = aligned_row_pitch(row_size, alignment)?;
        let total_bytes = if height == 0 {
            0
        } else {
            (row_pitch as u64)
                .checked_mul(height as u64 - 1)?
                .checked_add(row_size as u64)?
        };
        Some(Footprint {
            offset: 0,
            row_pitch,
            rows: height,
            row_size,
            total_bytes,
            width,
            height,
            format,
        })
    }

    /// Byte range in the buffer holding row `y`.
    pub fn row_range(&self, y: u32) -> std::ops::Range<usize> {
        let start = self.offset as usize + self.row_pitch as usize * y as usize;
        start..start + self.row_size as usize
    }

    /// Bytes a dense source image needs to fill this footprint.
    pub fn dense_len(&self) -> usize {
        self.row_size as usize * self.rows as usize
    }

    /// Bytes of buffer this footprint reaches into, counting its offset.
    pub fn end(&self) -> u64 {
        self.offset + self.total_bytes
    }
}

/// Rounds `row_size` up to a multiple of `alignment`.
pub fn aligned_row_pitch(row_size: u32, alignment: u32) -> Option<u32> {
    row_size
        .checked_add(alignment - 1)?
        .div_euclid(alignment)
        .checked_mul(alignment)
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("Device removed: {0}")]
    Removed(String),
    #[error("Out of memory creating {what} ({bytes} bytes)")]
    OutOfMemory { what: String, bytes: u64 },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Can't map buffer: {0}")]
    Map(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PresentError {
    #[error("Device lost during present: {0}")]
    DeviceLost(String),
    #[error("Back buffers are still referenced; release them before resizing")]
    BackBuffersInUse,
    #[error("No back buffer at index {0}")]
    NoSuchBuffer(usize),
    #[error("Surface error: {0}")]
    Surface(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/**
A GPU device.

Handles are cheap to clone and safe to share; the loader moves clones of textures across threads.
*/
pub trait Device: Sized + Send + Sync + Debug + 'static {
    type Texture: Clone + Send + Sync + Debug + 'static;
    type Buffer: Send + Sync + Debug + 'static;
    type View: Clone + Send + Sync + Debug + 'static;
    type Fence: Fence;
    type Queue: Queue<Self>;
    type CommandList: CommandList<Self>;

    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence, DeviceError>;
    fn create_queue(&self, class: QueueClass, label: &str) -> Result<Self::Queue, DeviceError>;
    fn create_command_list(
        &self,
        class: QueueClass,
        label: &str,
    ) -> Result<Self::CommandList, DeviceError>;
    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, DeviceError>;
    /// Creates a buffer the CPU can write and copy commands can read.
    fn create_upload_buffer(&self, size: u64, label: &str) -> Result<Self::Buffer, DeviceError>;
    fn create_view(&self, texture: &Self::Texture, kind: ViewKind)
    -> Result<Self::View, DeviceError>;
    /// The layout a copy into a texture of `desc` requires.
    fn copyable_footprint(&self, desc: &TextureDesc) -> Result<Footprint, DeviceError>;
    /// Maps `buffer` for writing, runs `f` over its whole contents, unmaps.
    fn map_write<R>(
        &self,
        buffer: &Self::Buffer,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, DeviceError>;
    /// If the device was removed, why.
    fn removal_reason(&self) -> Option<String>;
}

pub trait Fence: Send + Sync + Debug + 'static {
    fn completed_value(&self) -> u64;
    /// Blocks until the completed value reaches `value`.
    fn wait_for(&self, value: u64) -> Result<(), DeviceError>;
}

pub trait Queue<D: Device>: Send + Sync + Debug + 'static {
    fn class(&self) -> QueueClass;
    /// Submits a closed command list.
    fn submit(&self, list: &D::CommandList) -> Result<(), DeviceError>;
    /// Enqueues a command that sets `fence` to `value` once prior work on this queue completes.
    fn signal(&self, fence: &D::Fence, value: u64) -> Result<(), DeviceError>;
}

pub trait CommandList<D: Device>: Send + Debug + 'static {
    fn class(&self) -> QueueClass;
    /// Reopens the list for recording, discarding prior commands.
    ///
    /// Fails if a submission of this list has not finished executing.
    fn reset(&mut self) -> Result<(), DeviceError>;
    fn copy_buffer_to_texture(&mut self, source: &D::Buffer, footprint: &Footprint, dest: &D::Texture);
    fn transition(&mut self, texture: &D::Texture, before: ResourceState, after: ResourceState);
    fn clear(&mut self, target: &D::Texture, color: [f32; 4]);
    fn close(&mut self) -> Result<(), DeviceError>;
}

/**
A presentation surface with a ring of back buffers.
*/
pub trait PresentSurface<D: Device>: Send + Debug {
    fn buffer_count(&self) -> usize;
    fn current_index(&self) -> usize;
    fn back_buffer(&self, index: usize) -> Result<D::Texture, PresentError>;
    fn format(&self) -> Format;
    /// Presents the current back buffer and advances to the next one.
    fn present(
        &mut self,
        queue: &D::Queue,
        sync_interval: u32,
        allow_tear: bool,
    ) -> Result<(), PresentError>;
    /// Recreates the back buffers.  All references obtained from [Self::back_buffer] must be
    /// dropped first.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), PresentError>;
}
