// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Staged uploads through a trampoline buffer.

The trampoline is one CPU-writable, GPU-readable buffer sized for the largest image the pipeline
accepts.  Every upload goes through it in turn:

1. [compute_footprint] asks the device how the destination wants its rows laid out.
2. [Trampoline::stage] copies the dense source rows to their pitch-aligned offsets.
3. [Trampoline::issue_copy] records the copy and the barrier out of the copy-destination state.
4. The caller submits, waits on a fence, and calls [Trampoline::retire].

Only one upload may be in the trampoline at a time.  Staging again before the previous copy was
retired is refused.
*/

use crate::fence::Drained;
use crate::gpu::{
    CommandList, Device, DeviceError, Footprint, Format, ResourceState, TextureDesc,
    post_copy_state,
};

/// Default trampoline capacity, in pixels.
pub const DEFAULT_MAX_EXTENT: (u32, u32) = (512, 512);

/// Where an upload is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    Unstaged,
    /// Pixels are in the trampoline.
    Staged,
    /// The copy is recorded; the GPU may be reading the trampoline.
    CopyIssued,
    /// The copy completed; the destination is usable and the trampoline free.
    Resident,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum UploadError {
    #[error("{width}x{height} exceeds the trampoline's capacity of {max_width}x{max_height}")]
    ExceedsCapacity {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
    #[error("Footprint needs {needed} bytes but the trampoline holds {capacity}")]
    FootprintTooLarge { needed: u64, capacity: u64 },
    #[error("Source has {actual} bytes but the footprint needs {expected}")]
    SourceTooShort { expected: usize, actual: usize },
    #[error("A copy out of the trampoline is still pending")]
    InFlight,
    #[error("Nothing matching this footprint is staged")]
    NotStaged,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// The layout the device requires for a copy into a texture described by `desc`.
///
/// Use the destination's description, not the source image's: the source is dense, the
/// destination may want padded rows.
pub fn compute_footprint<D: Device>(device: &D, desc: &TextureDesc) -> Result<Footprint, UploadError> {
    Ok(device.copyable_footprint(desc)?)
}

/**
The staging buffer.
*/
#[derive(Debug)]
pub struct Trampoline<D: Device> {
    buffer: D::Buffer,
    capacity: u64,
    max_width: u32,
    max_height: u32,
    state: UploadState,
    staged: Option<Footprint>,
}

impl<D: Device> Trampoline<D> {
    /// Creates a trampoline large enough for a `max_width` x `max_height` image of `format`.
    pub fn new(
        device: &D,
        max_width: u32,
        max_height: u32,
        format: Format,
    ) -> Result<Self, UploadError> {
        let desc = TextureDesc::sampled("trampoline_sizing", max_width, max_height, format);
        let footprint = compute_footprint(device, &desc)?;
        //copy sources must be 4-byte sized
        let capacity = footprint.end().div_ceil(4) * 4;
        let buffer = device.create_upload_buffer(capacity, "trampoline")?;
        logwise::info_sync!(
            "trampoline {w}x{h}: {bytes} bytes",
            w = max_width,
            h = max_height,
            bytes = capacity
        );
        Ok(Trampoline {
            buffer,
            capacity,
            max_width,
            max_height,
            state: UploadState::Unstaged,
            staged: None,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn max_extent(&self) -> (u32, u32) {
        (self.max_width, self.max_height)
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    /// Whether a `width` x `height` image fits.  Images exactly at capacity fit.
    pub fn check_capacity(&self, width: u32, height: u32) -> Result<(), UploadError> {
        if width > self.max_width || height > self.max_height {
            return Err(UploadError::ExceedsCapacity {
                width,
                height,
                max_width: self.max_width,
                max_height: self.max_height,
            });
        }
        Ok(())
    }

    /**
    Copies `pixels` (dense rows of `footprint.row_size` bytes) into the trampoline at the
    footprint's pitch-aligned offsets.

    Rejected requests leave the trampoline's contents as they were and log a warning.
    */
    pub fn stage(
        &mut self,
        device: &D,
        pixels: &[u8],
        footprint: &Footprint,
    ) -> Result<(), UploadError> {
        if let Err(e) = self.check_stage(pixels, footprint) {
            logwise::warn_sync!(
                "trampoline rejected upload: {e}",
                e = logwise::privacy::LogIt(&e)
            );
            return Err(e);
        }
        let row_size = footprint.row_size as usize;
        device.map_write(&self.buffer, |bytes| {
            for y in 0..footprint.rows {
                let source = &pixels[y as usize * row_size..][..row_size];
                bytes[footprint.row_range(y)].copy_from_slice(source);
            }
        })?;
        self.state = UploadState::Staged;
        self.staged = Some(*footprint);
        Ok(())
    }

    fn check_stage(&self, pixels: &[u8], footprint: &Footprint) -> Result<(), UploadError> {
        if self.state == UploadState::CopyIssued {
            return Err(UploadError::InFlight);
        }
        self.check_capacity(footprint.width, footprint.height)?;
        if footprint.end() > self.capacity {
            return Err(UploadError::FootprintTooLarge {
                needed: footprint.end(),
                capacity: self.capacity,
            });
        }
        if pixels.len() < footprint.dense_len() {
            return Err(UploadError::SourceTooShort {
                expected: footprint.dense_len(),
                actual: pixels.len(),
            });
        }
        Ok(())
    }

    /**
    Records a copy of the staged image into `dest`, then a barrier from
    [ResourceState::CopyDest] to the state the texture will really be in afterwards.

    That is `post_state`, unless `list` is a copy list: copy queues demote what they touch to
    [ResourceState::Common], so the barrier names that instead (see [post_copy_state]).
    Returns the state the barrier names.
    */
    pub fn issue_copy(
        &mut self,
        list: &mut D::CommandList,
        footprint: &Footprint,
        dest: &D::Texture,
        post_state: ResourceState,
    ) -> Result<ResourceState, UploadError> {
        if self.state != UploadState::Staged || self.staged != Some(*footprint) {
            return Err(UploadError::NotStaged);
        }
        list.copy_buffer_to_texture(&self.buffer, footprint, dest);
        let effective = post_copy_state(list.class(), post_state);
        list.transition(dest, ResourceState::CopyDest, effective);
        self.state = UploadState::CopyIssued;
        Ok(effective)
    }

    /// Marks the issued copy complete.  `drained` must come from a wait issued after the copy
    /// was submitted.
    pub fn retire(&mut self, drained: Drained) {
        if self.state == UploadState::CopyIssued {
            logwise::trace_sync!(
                "trampoline retired at fence {v}",
                v = drained.fence_value()
            );
            self.state = UploadState::Resident;
            self.staged = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::FenceSynchronizer;
    use crate::gpu::{Queue, QueueClass};
    use crate::imp::soft::{SoftDevice, SoftTexture};

    fn pattern(width: u32, height: u32) -> Vec<u8> {
        (0..width * height * 4).map(|i| (i % 251) as u8).collect()
    }

    fn trampoline(device: &SoftDevice) -> Trampoline<SoftDevice> {
        Trampoline::new(device, 512, 512, Format::Rgba8Unorm).unwrap()
    }

    #[test]
    fn staged_rows_land_at_pitch_offsets() {
        let device = SoftDevice::new();
        let mut t = trampoline(&device);
        for (w, h) in [(1, 1), (100, 3), (64, 64), (333, 17), (512, 512)] {
            let desc = TextureDesc::sampled("dest", w, h, Format::Rgba8Unorm);
            let footprint = compute_footprint(&device, &desc).unwrap();
            let pixels = pattern(w, h);
            t.stage(&device, &pixels, &footprint).unwrap();
            let bytes = t.buffer().read_bytes();
            let mut readback = Vec::new();
            for y in 0..footprint.rows {
                readback.extend_from_slice(&bytes[footprint.row_range(y)]);
            }
            assert_eq!(readback, pixels, "{w}x{h}");
        }
    }

    #[test]
    fn oversized_stage_leaves_contents_alone() {
        let device = SoftDevice::new();
        let mut t = trampoline(&device);
        let desc = TextureDesc::sampled("small", 8, 8, Format::Rgba8Unorm);
        let footprint = compute_footprint(&device, &desc).unwrap();
        t.stage(&device, &pattern(8, 8), &footprint).unwrap();
        let before = t.buffer().read_bytes();

        let big = TextureDesc::sampled("big", 513, 4, Format::Rgba8Unorm);
        let big_footprint = compute_footprint(&device, &big).unwrap();
        let r = t.stage(&device, &pattern(513, 4), &big_footprint);
        assert!(matches!(r, Err(UploadError::ExceedsCapacity { width: 513, .. })));
        assert_eq!(t.buffer().read_bytes(), before);
        assert_eq!(t.state(), UploadState::Staged);
    }

    #[test]
    fn short_source_is_rejected() {
        let device = SoftDevice::new();
        let mut t = trampoline(&device);
        let desc = TextureDesc::sampled("d", 8, 8, Format::Rgba8Unorm);
        let footprint = compute_footprint(&device, &desc).unwrap();
        let r = t.stage(&device, &[0; 10], &footprint);
        assert!(matches!(r, Err(UploadError::SourceTooShort { actual: 10, .. })));
        assert_eq!(t.state(), UploadState::Unstaged);
    }

    fn upload_through(
        class: QueueClass,
        post_state: ResourceState,
    ) -> (SoftDevice, SoftTexture, ResourceState, Vec<u8>) {
        let device = SoftDevice::new();
        let queue = device.create_queue(class, "q").unwrap();
        let mut list = device.create_command_list(class, "upload").unwrap();
        let mut sync = FenceSynchronizer::<SoftDevice, 1>::new(&device, 0).unwrap();
        let mut t = trampoline(&device);
        let desc = TextureDesc::sampled("dest", 100, 30, Format::Rgba8Unorm);
        let dest = device.create_texture(&desc).unwrap();
        let footprint = compute_footprint(&device, &desc).unwrap();
        let pixels = pattern(100, 30);
        t.stage(&device, &pixels, &footprint).unwrap();
        let effective = t.issue_copy(&mut list, &footprint, &dest, post_state).unwrap();
        assert_eq!(t.state(), UploadState::CopyIssued);
        assert!(matches!(
            t.stage(&device, &pixels, &footprint),
            Err(UploadError::InFlight)
        ));
        list.close().unwrap();
        queue.submit(&list).unwrap();
        let drained = sync.block_until_current_slot_done(&queue).unwrap();
        t.retire(drained);
        assert_eq!(t.state(), UploadState::Resident);
        (device, dest, effective, pixels)
    }

    #[test]
    fn copy_queue_upload_decays_to_common() {
        let (device, dest, effective, pixels) =
            upload_through(QueueClass::Copy, ResourceState::ShaderRead);
        assert_eq!(effective, ResourceState::Common);
        assert_eq!(dest.state(), ResourceState::Common);
        assert_eq!(dest.read_pixels(), pixels);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn graphics_queue_upload_keeps_requested_state() {
        let (device, dest, effective, pixels) =
            upload_through(QueueClass::Graphics, ResourceState::ShaderRead);
        assert_eq!(effective, ResourceState::ShaderRead);
        assert_eq!(dest.state(), ResourceState::ShaderRead);
        assert_eq!(dest.read_pixels(), pixels);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn issue_without_stage_fails() {
        let device = SoftDevice::new();
        let mut t = trampoline(&device);
        let mut list = device.create_command_list(QueueClass::Copy, "l").unwrap();
        let desc = TextureDesc::sampled("d", 4, 4, Format::Rgba8Unorm);
        let dest = device.create_texture(&desc).unwrap();
        let footprint = compute_footprint(&device, &desc).unwrap();
        assert!(matches!(
            t.issue_copy(&mut list, &footprint, &dest, ResourceState::ShaderRead),
            Err(UploadError::NotStaged)
        ));
    }
}
