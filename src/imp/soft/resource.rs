// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::gpu::{Format, ResourceState, TextureDesc, ViewKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct TextureInner {
    id: u64,
    desc: TextureDesc,
    pixels: Mutex<Vec<u8>>,
    state: Mutex<ResourceState>,
}

/**
A texture in CPU memory.

Pixels are stored densely, row-major.  Clones refer to the same texture.
*/
#[derive(Debug, Clone)]
pub struct SoftTexture(Arc<TextureInner>);

impl SoftTexture {
    pub(super) fn new(id: u64, desc: TextureDesc) -> Self {
        let len = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        let state = desc.usage.initial_state();
        SoftTexture(Arc::new(TextureInner {
            id,
            desc,
            pixels: Mutex::new(vec![0; len]),
            state: Mutex::new(state),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }
    pub fn width(&self) -> u32 {
        self.0.desc.width
    }
    pub fn height(&self) -> u32 {
        self.0.desc.height
    }
    pub fn format(&self) -> Format {
        self.0.desc.format
    }
    pub fn label(&self) -> &str {
        &self.0.desc.label
    }

    /// The state the last executed barrier left the texture in.
    pub fn state(&self) -> ResourceState {
        *self.0.state.lock().unwrap()
    }

    /// Copies out the texture's dense pixel data.
    pub fn read_pixels(&self) -> Vec<u8> {
        self.0.pixels.lock().unwrap().clone()
    }

    pub fn same_texture(&self, other: &SoftTexture) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(super) fn set_state(&self, state: ResourceState) {
        *self.0.state.lock().unwrap() = state;
    }

    fn dense_row_bytes(&self) -> usize {
        self.0.desc.width as usize * self.0.desc.format.bytes_per_pixel() as usize
    }

    pub(super) fn write_row(&self, y: u32, row: &[u8]) {
        let row_bytes = self.dense_row_bytes();
        let start = y as usize * row_bytes;
        let mut pixels = self.0.pixels.lock().unwrap();
        if start >= pixels.len() {
            return;
        }
        let len = row.len().min(row_bytes);
        pixels[start..start + len].copy_from_slice(&row[..len]);
    }

    pub(super) fn fill(&self, texel: [u8; 4]) {
        let mut pixels = self.0.pixels.lock().unwrap();
        for chunk in pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&texel);
        }
    }

    pub(super) fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

#[derive(Debug)]
struct BufferInner {
    id: u64,
    label: String,
    bytes: Mutex<Vec<u8>>,
    pending_reads: AtomicUsize,
}

/// An upload buffer.
#[derive(Debug, Clone)]
pub struct SoftBuffer(Arc<BufferInner>);

impl SoftBuffer {
    pub(super) fn new(id: u64, label: &str, len: usize) -> Self {
        SoftBuffer(Arc::new(BufferInner {
            id,
            label: label.to_string(),
            bytes: Mutex::new(vec![0; len]),
            pending_reads: AtomicUsize::new(0),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }
    pub fn label(&self) -> &str {
        &self.0.label
    }
    pub fn len(&self) -> usize {
        self.0.bytes.lock().unwrap().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out the buffer contents.
    pub fn read_bytes(&self) -> Vec<u8> {
        self.0.bytes.lock().unwrap().clone()
    }

    /// Copies submitted but not yet executed that read from this buffer.
    pub fn pending_reads(&self) -> usize {
        self.0.pending_reads.load(Ordering::Acquire)
    }

    pub(super) fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.0.bytes.lock().unwrap();
        f(&mut bytes)
    }

    pub(super) fn begin_read(&self) {
        self.0.pending_reads.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn end_read(&self) {
        self.0.pending_reads.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A view of a [SoftTexture].
#[derive(Debug, Clone)]
pub struct SoftView {
    texture: SoftTexture,
    kind: ViewKind,
}

impl SoftView {
    pub(super) fn new(texture: SoftTexture, kind: ViewKind) -> Self {
        SoftView { texture, kind }
    }
    pub fn texture(&self) -> &SoftTexture {
        &self.texture
    }
    pub fn kind(&self) -> ViewKind {
        self.kind
    }
}
