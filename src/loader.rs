// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Background texture streaming.

A [Loader] uploads one image synchronously on the caller's thread ([Loader::init]), so there is
something to draw right away, then streams the rest of a [WorkQueue] on its own thread through
a single [Trampoline] and its own copy queue.  After every upload the worker waits on a private
fence, because the next upload overwrites the trampoline.

When the queue runs dry or shutdown is requested, the uploaded textures are delivered, in queue
order, through the [Handoff] registered with [Loader::set_consumer].

```
# use framestream::loader::{Loader, LoaderConfig, LoaderState, WorkQueue, handoff};
# use framestream::asset::DecodedImage;
# use framestream::gpu::Format;
# use framestream::imp::soft::SoftDevice;
# use std::sync::Arc;
let device = Arc::new(SoftDevice::new());
let mut loader = Loader::new(device, LoaderConfig::default()).unwrap();
let splash = DecodedImage { width: 2, height: 2, format: Format::Rgba8Unorm, pixels: vec![255; 16] };
loader.init_image("splash", splash).unwrap();
assert!(loader.is_ready());

let (sender, receiver) = handoff();
loader.set_consumer(sender).unwrap();
loader.start(WorkQueue::new()).unwrap();
let payload = receiver.wait().unwrap();
assert!(payload.is_empty());
loader.shutdown();
assert_eq!(loader.state(), LoaderState::Ready);
```
*/

mod handoff;

pub use handoff::{Handoff, HandoffError, PayloadReceiver, handoff};

use crate::asset::{self, AssetError, AssetRequest, DecodedImage};
use crate::config;
use crate::fence::{FenceError, FenceSynchronizer};
use crate::gpu::{
    CommandList, Device, DeviceError, Format, Queue, QueueClass, ResourceState, TextureDesc,
};
use crate::upload::{DEFAULT_MAX_EXTENT, Trampoline, UploadError, compute_footprint};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Sleep between uploads.  Cosmetic; lets a loading screen show progress.
    pub pacing: Duration,
    /// Largest image the trampoline holds.
    pub max_extent: (u32, u32),
    /// Format the trampoline is sized for.
    pub format: Format,
    /// State uploaded textures are requested to end in.
    pub post_state: ResourceState,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            pacing: Duration::ZERO,
            max_extent: DEFAULT_MAX_EXTENT,
            format: Format::Rgba8Unorm,
            post_state: ResourceState::ShaderRead,
        }
    }
}

impl LoaderConfig {
    /// Defaults, overridden by `FRAMESTREAM_PACING_MS` and `FRAMESTREAM_TRAMPOLINE_EXTENT`.
    pub fn from_env() -> Self {
        let mut config = LoaderConfig::default();
        if let Some(ms) = config::number(config::PACING_MS) {
            config.pacing = Duration::from_millis(ms);
        }
        if let Some(extent) = config::extent(config::TRAMPOLINE_EXTENT) {
            config.max_extent = extent;
        }
        config
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoaderError {
    #[error("Loader has not completed its first upload")]
    NotInitialized,
    #[error("Loader was already initialized")]
    AlreadyInitialized,
    #[error("Loader was already started")]
    AlreadyStarted,
    #[error("A consumer is already registered")]
    ConsumerAlreadySet,
    #[error("Can't spawn loader thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Fence(#[from] FenceError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl LoaderError {
    /// Problems with one image's content, after which the loader moves on.
    fn is_skippable(&self) -> bool {
        matches!(
            self,
            LoaderError::Asset(_)
                | LoaderError::Upload(
                    UploadError::ExceedsCapacity { .. } | UploadError::SourceTooShort { .. }
                )
        )
    }
}

/**
Whether the loader has something to draw.

`Streaming` and `Ready` both count as ready; `Ready` additionally means the worker is done and
the payload was handed off.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoaderState {
    NotReady = 0,
    Streaming = 1,
    Ready = 2,
}

impl LoaderState {
    fn from_u8(v: u8) -> LoaderState {
        match v {
            1 => LoaderState::Streaming,
            2 => LoaderState::Ready,
            _ => LoaderState::NotReady,
        }
    }
}

/// Requests shared between the thread that fills the queue and the worker that drains it.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue(Arc<Mutex<VecDeque<AssetRequest>>>);

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: AssetRequest) {
        self.0.lock().unwrap().push_back(request);
    }

    pub fn pop_front(&self) -> Option<AssetRequest> {
        self.0.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<AssetRequest> for WorkQueue {
    fn from_iter<I: IntoIterator<Item = AssetRequest>>(iter: I) -> Self {
        WorkQueue(Arc::new(Mutex::new(iter.into_iter().collect())))
    }
}

/// A texture the loader uploaded.
#[derive(Debug, Clone)]
pub struct UploadedTexture<D: Device> {
    pub request: AssetRequest,
    pub texture: D::Texture,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// The state the texture was left in.
    pub state: ResourceState,
}

/// Uploaded textures, in the order their requests were queued.
#[derive(Debug)]
pub struct Payload<D: Device> {
    textures: Vec<UploadedTexture<D>>,
}

impl<D: Device> Default for Payload<D> {
    fn default() -> Self {
        Payload {
            textures: Vec::new(),
        }
    }
}

impl<D: Device> Payload<D> {
    pub fn len(&self) -> usize {
        self.textures.len()
    }
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<&UploadedTexture<D>> {
        self.textures.get(index)
    }
    pub fn iter(&self) -> std::slice::Iter<'_, UploadedTexture<D>> {
        self.textures.iter()
    }
    pub fn labels(&self) -> Vec<&str> {
        self.textures.iter().map(|t| t.request.label.as_str()).collect()
    }
    pub fn into_vec(self) -> Vec<UploadedTexture<D>> {
        self.textures
    }
}

impl<D: Device> IntoIterator for Payload<D> {
    type Item = UploadedTexture<D>;
    type IntoIter = std::vec::IntoIter<UploadedTexture<D>>;
    fn into_iter(self) -> Self::IntoIter {
        self.textures.into_iter()
    }
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    shutdown: AtomicBool,
    streaming: AtomicBool,
    error: Mutex<Option<LoaderError>>,
}

impl Shared {
    fn set_state(&self, state: LoaderState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Worker progress, traced as it changes.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Starting,
    Idle,
    Uploading,
    Draining,
    HandoffInvoked,
    Stopped,
}

fn enter(phase: Phase) {
    logwise::trace_sync!("loader phase {phase}", phase = logwise::privacy::LogIt(&phase));
}

/// What the worker thread owns once started.
#[derive(Debug)]
struct Worker<D: Device> {
    device: Arc<D>,
    queue: D::Queue,
    list: D::CommandList,
    trampoline: Trampoline<D>,
    sync: FenceSynchronizer<D, 1>,
    config: LoaderConfig,
}

impl<D: Device> Worker<D> {
    fn upload(
        &mut self,
        request: &AssetRequest,
        image: DecodedImage,
    ) -> Result<UploadedTexture<D>, LoaderError> {
        self.list.reset()?;
        let desc = TextureDesc::sampled(request.label.clone(), image.width, image.height, image.format);
        let texture = self.device.create_texture(&desc)?;
        let footprint = compute_footprint(&*self.device, &desc)?;
        self.trampoline.stage(&*self.device, &image.pixels, &footprint)?;
        let state = self.trampoline.issue_copy(
            &mut self.list,
            &footprint,
            &texture,
            self.config.post_state,
        )?;
        self.list.close()?;
        self.queue.submit(&self.list)?;
        enter(Phase::Draining);
        let drained = self.sync.block_until_current_slot_done(&self.queue)?;
        self.trampoline.retire(drained);
        logwise::info_sync!(
            "uploaded {label} ({w}x{h})",
            label = request.label.clone(),
            w = image.width,
            h = image.height
        );
        Ok(UploadedTexture {
            request: request.clone(),
            texture,
            width: image.width,
            height: image.height,
            format: image.format,
            state,
        })
    }

    fn run(mut self, work: WorkQueue, shared: Arc<Shared>, consumer: Option<Handoff<D>>) {
        enter(Phase::Starting);
        let mut textures = Vec::new();
        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                logwise::info_sync!(
                    "loader shutdown requested with {n} requests left",
                    n = work.len()
                );
                break;
            }
            let Some(request) = work.pop_front() else {
                enter(Phase::Idle);
                break;
            };
            let Some(image) = asset::load_or_skip(&request, self.trampoline.max_extent()) else {
                continue;
            };
            if !self.config.pacing.is_zero() {
                std::thread::sleep(self.config.pacing);
            }
            enter(Phase::Uploading);
            match self.upload(&request, image) {
                Ok(texture) => textures.push(texture),
                Err(e) if e.is_skippable() => {
                    logwise::warn_sync!(
                        "skipping {label}: {e}",
                        label = request.label.clone(),
                        e = logwise::privacy::LogIt(&e)
                    );
                }
                Err(e) => {
                    logwise::error_sync!(
                        "loader stopping after {label}: {e}",
                        label = request.label.clone(),
                        e = logwise::privacy::LogIt(&e)
                    );
                    *shared.error.lock().unwrap() = Some(e);
                    break;
                }
            }
        }
        let payload = Payload { textures };
        enter(Phase::HandoffInvoked);
        match consumer {
            Some(handoff) => handoff.deliver(payload),
            None => logwise::warn_sync!(
                "no consumer registered; dropping {n} textures",
                n = payload.len()
            ),
        }
        //observers that see Ready must also see the worker stopped
        shared.streaming.store(false, Ordering::Release);
        shared.set_state(LoaderState::Ready);
        enter(Phase::Stopped);
    }
}

/**
Streams textures on a background thread.
*/
#[derive(Debug)]
pub struct Loader<D: Device> {
    shared: Arc<Shared>,
    worker: Option<Worker<D>>,
    consumer: Option<Handoff<D>>,
    thread: Option<JoinHandle<()>>,
}

impl<D: Device> Loader<D> {
    /// Creates the copy queue, command list, trampoline and fence the worker will use.
    pub fn new(device: Arc<D>, config: LoaderConfig) -> Result<Self, LoaderError> {
        let queue = device.create_queue(QueueClass::Copy, "loader_copy")?;
        let list = device.create_command_list(QueueClass::Copy, "loader_upload")?;
        let (max_width, max_height) = config.max_extent;
        let trampoline = Trampoline::new(&*device, max_width, max_height, config.format)?;
        let sync = FenceSynchronizer::new(&*device, 0)?;
        Ok(Loader {
            shared: Arc::new(Shared {
                state: AtomicU8::new(LoaderState::NotReady as u8),
                shutdown: AtomicBool::new(false),
                streaming: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
            worker: Some(Worker {
                device,
                queue,
                list,
                trampoline,
                sync,
                config,
            }),
            consumer: None,
            thread: None,
        })
    }

    /// Loads `first` and uploads it on this thread, waiting for the GPU.
    pub fn init(&mut self, first: &AssetRequest) -> Result<UploadedTexture<D>, LoaderError> {
        let max = self
            .worker
            .as_ref()
            .ok_or(LoaderError::AlreadyStarted)?
            .trampoline
            .max_extent();
        let image = asset::load(first, max).inspect_err(|e| {
            logwise::warn_sync!(
                "can't load first asset {label}: {e}",
                label = first.label.clone(),
                e = logwise::privacy::LogIt(e)
            );
        })?;
        self.upload_first(first.clone(), image)
    }

    /// [Self::init] with an image already in memory.
    pub fn init_image(
        &mut self,
        label: &str,
        image: DecodedImage,
    ) -> Result<UploadedTexture<D>, LoaderError> {
        self.upload_first(AssetRequest::new(label), image)
    }

    fn upload_first(
        &mut self,
        request: AssetRequest,
        image: DecodedImage,
    ) -> Result<UploadedTexture<D>, LoaderError> {
        if self.state() != LoaderState::NotReady {
            return Err(LoaderError::AlreadyInitialized);
        }
        let worker = self.worker.as_mut().ok_or(LoaderError::AlreadyStarted)?;
        let texture = worker.upload(&request, image)?;
        self.shared.set_state(LoaderState::Streaming);
        Ok(texture)
    }

    /// Registers where the payload goes.  Must come before [Self::start].
    pub fn set_consumer(&mut self, consumer: Handoff<D>) -> Result<(), LoaderError> {
        if self.worker.is_none() {
            return Err(LoaderError::AlreadyStarted);
        }
        if self.consumer.is_some() {
            return Err(LoaderError::ConsumerAlreadySet);
        }
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Starts the worker thread draining `work`.
    pub fn start(&mut self, work: WorkQueue) -> Result<(), LoaderError> {
        if self.state() == LoaderState::NotReady {
            return Err(LoaderError::NotInitialized);
        }
        let worker = self.worker.take().ok_or(LoaderError::AlreadyStarted)?;
        if self.consumer.is_none() {
            logwise::warn_sync!("loader started without a consumer");
        }
        let consumer = self.consumer.take();
        let shared = self.shared.clone();
        self.shared.streaming.store(true, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name("framestream_loader".to_string())
            .spawn(move || worker.run(work, shared, consumer));
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.streaming.store(false, Ordering::Release);
                Err(LoaderError::Spawn(e))
            }
        }
    }

    /// True once the first upload completed.
    pub fn is_ready(&self) -> bool {
        self.state() != LoaderState::NotReady
    }

    /// True while the worker thread is running.  Always false once [Self::state] is
    /// [LoaderState::Ready].
    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LoaderState {
        LoaderState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// The error that stopped the worker early, if any.
    pub fn take_error(&self) -> Option<LoaderError> {
        self.shared.error.lock().unwrap().take()
    }

    /// Asks the worker to stop after its current upload and joins it.  Safe to call repeatedly,
    /// or without [Self::start].
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let wait = logwise::perfwarn_begin!("Loader::shutdown join");
            if handle.join().is_err() {
                logwise::error_sync!("loader worker panicked");
            }
            drop(wait);
        }
    }
}

impl<D: Device> Drop for Loader<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::soft::SoftDevice;

    fn image(width: u32, height: u32, seed: u8) -> DecodedImage {
        DecodedImage {
            width,
            height,
            format: Format::Rgba8Unorm,
            pixels: (0..width * height * 4).map(|i| (i as u8).wrapping_add(seed)).collect(),
        }
    }

    fn loader(device: &Arc<SoftDevice>) -> Loader<SoftDevice> {
        Loader::new(device.clone(), LoaderConfig::default()).unwrap()
    }

    #[test]
    fn first_upload_makes_ready() {
        let device = Arc::new(SoftDevice::new());
        let mut loader = loader(&device);
        assert_eq!(loader.state(), LoaderState::NotReady);
        assert!(!loader.is_ready());
        let splash = loader.init_image("splash", image(16, 16, 3)).unwrap();
        assert_eq!(splash.texture.read_pixels(), image(16, 16, 3).pixels);
        assert_eq!(splash.state, ResourceState::Common);
        assert_eq!(loader.state(), LoaderState::Streaming);
        assert!(loader.is_ready());
        assert!(matches!(
            loader.init_image("again", image(1, 1, 0)),
            Err(LoaderError::AlreadyInitialized)
        ));
        assert!(device.violations().is_empty());
    }

    #[test]
    fn missing_first_asset_stays_not_ready() {
        let device = Arc::new(SoftDevice::new());
        let mut loader = loader(&device);
        let r = loader.init(&AssetRequest::new("/nonexistent/framestream/splash.raw"));
        assert!(matches!(r, Err(LoaderError::Asset(AssetError::NotFound(_)))));
        assert!(!loader.is_ready());
    }

    #[test]
    fn start_requires_init() {
        let device = Arc::new(SoftDevice::new());
        let mut loader = loader(&device);
        assert!(matches!(
            loader.start(WorkQueue::new()),
            Err(LoaderError::NotInitialized)
        ));
    }

    #[test]
    fn consumer_must_precede_start() {
        let device = Arc::new(SoftDevice::new());
        let mut loader = loader(&device);
        loader.init_image("splash", image(4, 4, 0)).unwrap();
        let (first, _r1) = handoff();
        loader.set_consumer(first).unwrap();
        let (second, _r2) = handoff();
        assert!(matches!(
            loader.set_consumer(second),
            Err(LoaderError::ConsumerAlreadySet)
        ));
        loader.start(WorkQueue::new()).unwrap();
        let (late, _r3) = handoff();
        assert!(matches!(
            loader.set_consumer(late),
            Err(LoaderError::AlreadyStarted)
        ));
        assert!(matches!(
            loader.start(WorkQueue::new()),
            Err(LoaderError::AlreadyStarted)
        ));
    }

    #[test]
    fn shutdown_without_start_is_fine() {
        let device = Arc::new(SoftDevice::new());
        let mut loader = loader(&device);
        let (h, r) = handoff();
        loader.set_consumer(h).unwrap();
        loader.shutdown();
        loader.shutdown();
        drop(loader);
        assert_eq!(r.wait().unwrap_err(), HandoffError::Abandoned);
    }

    #[test]
    fn work_queue_is_fifo() {
        let queue: WorkQueue = ["a", "b", "c"].into_iter().map(AssetRequest::new).collect();
        let clone = queue.clone();
        clone.push(AssetRequest::new("d"));
        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|r| r.label)
            .collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
        assert!(clone.is_empty());
    }

    #[test]
    fn skippable_errors() {
        assert!(LoaderError::Asset(AssetError::Empty).is_skippable());
        assert!(!LoaderError::NotInitialized.is_skippable());
        assert!(
            !LoaderError::Device(DeviceError::Removed("x".to_string())).is_skippable()
        );
    }

    #[test]
    fn ready_is_never_seen_while_streaming() {
        let device = Arc::new(SoftDevice::new());
        let mut loader = loader(&device);
        loader.init_image("splash", image(4, 4, 0)).unwrap();
        let work: WorkQueue = (0..200)
            .map(|i| AssetRequest::new(format!("/nonexistent/framestream/{i}.raw")))
            .collect();
        loader.start(work).unwrap();
        loop {
            let state = loader.state();
            let streaming = loader.is_streaming();
            if state == LoaderState::Ready {
                assert!(!streaming);
                break;
            }
            std::thread::yield_now();
        }
        loader.shutdown();
        assert!(loader.take_error().is_none());
    }
}
