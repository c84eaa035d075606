// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The per-frame driver.

A [FrameLoop] owns the graphics queue, the presentation surface, one command list per back buffer
and a [FenceSynchronizer] pacing them.  Each [FrameLoop::render_frame] records one [Scene] into
the current back buffer, submits and presents, then waits (if needed) until the slot it enters
is free again.
*/

use crate::config;
use crate::fence::{Drained, FenceError, FenceSynchronizer};
use crate::gpu::{
    CommandList, Device, DeviceError, PresentError, PresentSurface, Queue, QueueClass,
    ResourceState, ViewKind,
};
use crate::multibuffer::{BindError, ResourceSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Vertical blanks to wait per present.  0 presents immediately.
    pub sync_interval: u32,
    /// Allow tearing when `sync_interval` is 0.
    pub allow_tearing: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            sync_interval: 1,
            allow_tearing: false,
        }
    }
}

impl FrameConfig {
    /// Defaults, overridden by `FRAMESTREAM_SYNC_INTERVAL` and `FRAMESTREAM_ALLOW_TEARING`.
    pub fn from_env() -> Self {
        let mut config = FrameConfig::default();
        if let Some(interval) = config::number(config::SYNC_INTERVAL) {
            config.sync_interval = interval.min(4) as u32;
        }
        if let Some(tear) = config::flag(config::ALLOW_TEARING) {
            config.allow_tearing = tear;
        }
        config
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FrameError {
    #[error("Scene panicked: {0}")]
    ScenePanicked(String),
    #[error("Device removed: {reason}")]
    DeviceRemoved { reason: String },
    #[error("No render target bound for slot {0}")]
    UnboundSlot(usize),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Fence(#[from] FenceError),
    #[error(transparent)]
    Present(#[from] PresentError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/**
Something that draws a frame.
*/
pub trait Scene<D: Device> {
    /// Whether the scene has what it needs to draw.
    fn is_ready(&self) -> bool {
        true
    }
    /// Advances by `elapsed` since the previous frame.
    fn update(&mut self, _elapsed: Duration) {}
    /// Records into `list`.  `target` is in [ResourceState::RenderTarget].
    fn record(&mut self, list: &mut D::CommandList, target: &D::Texture);
}

/// The first scene that is ready, typically the main scene ahead of a loading screen.
pub fn pick_ready<'s, D: Device>(
    scenes: &'s mut [Box<dyn Scene<D>>],
) -> Option<&'s mut dyn Scene<D>> {
    for scene in scenes.iter_mut() {
        if scene.is_ready() {
            return Some(scene.as_mut());
        }
    }
    None
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/**
Drives rendering and presentation across `N` back buffers.
*/
#[derive(Debug)]
pub struct FrameLoop<D: Device, S: PresentSurface<D>, const N: usize> {
    device: Arc<D>,
    queue: D::Queue,
    surface: S,
    sync: FenceSynchronizer<D, N>,
    targets: ResourceSet<D, N>,
    lists: Vec<D::CommandList>,
    config: FrameConfig,
    last_frame: Option<Instant>,
    frames: u64,
}

impl<D: Device, S: PresentSurface<D>, const N: usize> FrameLoop<D, S, N> {
    pub fn new(device: Arc<D>, surface: S, config: FrameConfig) -> Result<Self, FrameError> {
        let queue = device.create_queue(QueueClass::Graphics, "frame_graphics")?;
        let sync = FenceSynchronizer::new(&*device, surface.current_index())?;
        let mut targets = ResourceSet::new(ViewKind::RenderTarget);
        targets.bind_to_display_surface(&*device, &surface)?;
        let lists = (0..N)
            .map(|i| device.create_command_list(QueueClass::Graphics, &format!("frame_{i}")))
            .collect::<Result<Vec<_>, _>>()?;
        logwise::info_sync!("frame loop with {n} slots", n = N);
        Ok(FrameLoop {
            device,
            queue,
            surface,
            sync,
            targets,
            lists,
            config,
            last_frame: None,
            frames: 0,
        })
    }

    /**
    Records `scene` into the current back buffer, submits, presents, and waits until the next
    slot is free.

    A scene panic is caught here and returned as [FrameError::ScenePanicked].  Nothing is
    submitted for that frame.
    */
    pub fn render_frame(&mut self, scene: &mut dyn Scene<D>) -> Result<(), FrameError> {
        let result = self.render_inner(scene);
        if let Err(e) = &result
            && !matches!(e, FrameError::ScenePanicked(_))
            && let Some(reason) = self.device.removal_reason()
        {
            logwise::error_sync!("frame {n} lost the device: {reason}", n = self.frames, reason = reason.clone());
            return Err(FrameError::DeviceRemoved { reason });
        }
        result
    }

    fn render_inner(&mut self, scene: &mut dyn Scene<D>) -> Result<(), FrameError> {
        let now = Instant::now();
        let elapsed = self
            .last_frame
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_frame = Some(now);

        let index = self.sync.index();
        let target = self
            .targets
            .resource(index)
            .cloned()
            .ok_or(FrameError::UnboundSlot(index))?;
        let list = &mut self.lists[index];
        list.reset()?;
        list.transition(&target, ResourceState::Present, ResourceState::RenderTarget);
        let recorded = std::panic::catch_unwind(AssertUnwindSafe(|| {
            scene.update(elapsed);
            scene.record(list, &target);
        }));
        if let Err(payload) = recorded {
            let message = panic_message(payload.as_ref());
            logwise::error_sync!(
                "scene panicked in frame {n}: {message}",
                n = self.frames,
                message = message.clone()
            );
            return Err(FrameError::ScenePanicked(message));
        }
        list.transition(&target, ResourceState::RenderTarget, ResourceState::Present);
        list.close()?;
        self.queue.submit(list)?;
        drop(target);

        match self.sync.advance_and_present_on(
            &*self.device,
            &self.queue,
            &mut self.surface,
            self.config.sync_interval,
            self.config.allow_tearing,
        ) {
            Ok(()) => {}
            Err(FenceError::Present {
                removal_reason: Some(reason),
                ..
            }) => return Err(FrameError::DeviceRemoved { reason }),
            Err(e) => return Err(e.into()),
        }
        self.frames += 1;
        Ok(())
    }

    /// Waits for the GPU, then recreates the back buffers at the new size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), FrameError> {
        logwise::info_sync!("resizing to {w}x{h}", w = width, h = height);
        let drained = self.sync.block_until_current_slot_done(&self.queue)?;
        //recorded commands hold references to the old back buffers
        for list in &mut self.lists {
            list.reset()?;
        }
        self.targets.reset_all(drained);
        self.surface.resize(width, height)?;
        self.targets
            .rebind_to_display_surface(&*self.device, &self.surface)?;
        self.sync.restart_at(self.surface.current_index(), drained)?;
        Ok(())
    }

    /// Waits until the GPU has finished every submitted frame.
    pub fn finish(&mut self) -> Result<Drained, FrameError> {
        Ok(self.sync.block_until_current_slot_done(&self.queue)?)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn queue(&self) -> &D::Queue {
        &self.queue
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn synchronizer(&self) -> &FenceSynchronizer<D, N> {
        &self.sync
    }

    pub fn targets(&self) -> &ResourceSet<D, N> {
        &self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::soft::{SoftCommandList, SoftDevice, SoftSurface, SoftTexture};

    struct Fill([f32; 4]);
    impl Scene<SoftDevice> for Fill {
        fn record(&mut self, list: &mut SoftCommandList, target: &SoftTexture) {
            list.clear(target, self.0);
        }
    }

    struct Panics;
    impl Scene<SoftDevice> for Panics {
        fn record(&mut self, _list: &mut SoftCommandList, _target: &SoftTexture) {
            panic!("scene exploded");
        }
    }

    struct Loading(bool);
    impl Scene<SoftDevice> for Loading {
        fn is_ready(&self) -> bool {
            self.0
        }
        fn record(&mut self, _list: &mut SoftCommandList, _target: &SoftTexture) {}
    }

    fn frame_loop(device: &Arc<SoftDevice>) -> FrameLoop<SoftDevice, SoftSurface, 2> {
        let surface = SoftSurface::new(device, 2, 8, 8).unwrap();
        FrameLoop::new(device.clone(), surface, FrameConfig::default()).unwrap()
    }

    #[test]
    fn frames_present_cleanly() {
        let device = Arc::new(SoftDevice::new());
        let mut frames = frame_loop(&device);
        let mut scene = Fill([1.0; 4]);
        for _ in 0..6 {
            frames.render_frame(&mut scene).unwrap();
        }
        let drained = frames.finish().unwrap();
        assert!(frames.synchronizer().completed_value() >= drained.fence_value());
        assert_eq!(frames.frames(), 6);
        assert_eq!(frames.queue().presented(), 6);
        let back = frames.surface().back_buffer(0).unwrap();
        assert!(back.read_pixels().iter().all(|&b| b == 255));
        assert_eq!(back.state(), ResourceState::Present);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn scene_panic_is_caught() {
        let device = Arc::new(SoftDevice::new());
        let mut frames = frame_loop(&device);
        match frames.render_frame(&mut Panics) {
            Err(FrameError::ScenePanicked(message)) => assert_eq!(message, "scene exploded"),
            other => panic!("expected ScenePanicked, got {other:?}"),
        }
        assert_eq!(frames.queue().presented(), 0);
    }

    #[test]
    fn lost_device_is_reported() {
        let device = Arc::new(SoftDevice::new());
        let mut frames = frame_loop(&device);
        frames.render_frame(&mut Fill([0.0; 4])).unwrap();
        device.lose("driver reset");
        match frames.render_frame(&mut Fill([0.0; 4])) {
            Err(FrameError::DeviceRemoved { reason }) => assert_eq!(reason, "driver reset"),
            other => panic!("expected DeviceRemoved, got {other:?}"),
        }
    }

    #[test]
    fn resize_rebinds_targets() {
        let device = Arc::new(SoftDevice::new());
        let mut frames = frame_loop(&device);
        let mut scene = Fill([0.5; 4]);
        frames.render_frame(&mut scene).unwrap();
        frames.resize(32, 16).unwrap();
        assert_eq!(frames.surface().size(), (32, 16));
        assert_eq!(frames.targets().bound(), 2);
        assert_eq!(frames.targets().resource(0).unwrap().width(), 32);
        assert_eq!(frames.synchronizer().index(), 0);
        for _ in 0..3 {
            frames.render_frame(&mut scene).unwrap();
        }
        let _drained = frames.finish().unwrap();
        assert!(device.violations().is_empty());
    }

    #[test]
    fn pick_ready_prefers_first_ready() {
        let mut scenes: Vec<Box<dyn Scene<SoftDevice>>> =
            vec![Box::new(Loading(false)), Box::new(Loading(true))];
        assert!(pick_ready(&mut scenes).is_some());
        let mut none: Vec<Box<dyn Scene<SoftDevice>>> = vec![Box::new(Loading(false))];
        assert!(pick_ready(&mut none).is_none());
    }
}
