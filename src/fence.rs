// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Fence pacing for N-buffered work.

A [FenceSynchronizer] owns one monotonically increasing fence and remembers, per slot, the value
that was last signaled when the CPU finished with that slot.  Before the CPU records into a slot
again, the fence must have passed that value.  This lets the CPU run up to N-1 frames ahead of the
GPU and no further.

```
# use framestream::fence::FenceSynchronizer;
# use framestream::imp::soft::{SoftDevice, SoftSurface};
# use framestream::gpu::{Device, QueueClass};
let device = SoftDevice::new();
let queue = device.create_queue(QueueClass::Graphics, "graphics").unwrap();
let mut surface = SoftSurface::new(&device, 2, 64, 64).unwrap();
let mut sync = FenceSynchronizer::<SoftDevice, 2>::new(&device, 0).unwrap();
// record and submit work for slot 0, then
sync.advance_and_present(&queue, &mut surface, 1, false).unwrap();
assert_eq!(sync.index(), 1);
let _drained = sync.block_until_current_slot_done(&queue).unwrap();
```
*/

use crate::gpu::{Device, DeviceError, Fence, PresentError, PresentSurface, Queue};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FenceError {
    #[error("Can't create fence: {0}")]
    Create(#[source] DeviceError),
    #[error("Slot {index} is out of range for {slots} slots")]
    InvalidSlot { index: usize, slots: usize },
    #[error("Present failed: {source}")]
    Present {
        #[source]
        source: PresentError,
        /// What the device reported when asked why it was removed.
        removal_reason: Option<String>,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/**
Proof that the fence has caught up with everything signaled so far.

Returned by [FenceSynchronizer::block_until_current_slot_done].  Operations that must not race the
GPU (dropping back buffers, reusing the trampoline) ask for one.
*/
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    fence_value: u64,
}

impl Drained {
    /// The fence value that was reached.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }
}

/**
Paces CPU recording against GPU completion across `N` slots.
*/
#[derive(Debug)]
pub struct FenceSynchronizer<D: Device, const N: usize> {
    fence: D::Fence,
    index: usize,
    //next value this slot signals
    target: [u64; N],
    //value last signaled when leaving each slot
    signaled: [u64; N],
}

impl<D: Device, const N: usize> FenceSynchronizer<D, N> {
    /// Creates a fence on `device` and binds to it.
    pub fn new(device: &D, initial_index: usize) -> Result<Self, FenceError> {
        let fence = device.create_fence(0).map_err(|e| {
            logwise::error_sync!(
                "Can't create fence: {e}",
                e = logwise::privacy::LogIt(&e)
            );
            FenceError::Create(e)
        })?;
        Self::init(fence, initial_index)
    }

    /// Binds to an existing fence, starting at `initial_index`.
    pub fn init(fence: D::Fence, initial_index: usize) -> Result<Self, FenceError> {
        if initial_index >= N {
            return Err(FenceError::InvalidSlot {
                index: initial_index,
                slots: N,
            });
        }
        let start = fence.completed_value();
        let mut target = [start; N];
        target[initial_index] = start + 1;
        Ok(FenceSynchronizer {
            fence,
            index: initial_index,
            target,
            signaled: [start; N],
        })
    }

    /// Raises the current slot's target by one, for extra work queued against it.
    pub fn mark_pending(&mut self) {
        self.target[self.index] += 1;
    }

    /**
    Signals the current slot, presents, moves to the slot the surface reports as current, and
    blocks until the GPU is done with that slot's previous frame.

    On a failed present nothing is waited on.  The error carries the device's removal reason;
    callers should log it and stop.
    */
    pub fn advance_and_present<S: PresentSurface<D>>(
        &mut self,
        queue: &D::Queue,
        surface: &mut S,
        sync_interval: u32,
        allow_tear: bool,
    ) -> Result<(), FenceError> {
        let current = self.target[self.index];
        queue.signal(&self.fence, current)?;
        self.signaled[self.index] = current;

        if let Err(source) = surface.present(queue, sync_interval, allow_tear) {
            logwise::error_sync!(
                "present failed: {source}",
                source = logwise::privacy::LogIt(&source)
            );
            return Err(FenceError::Present {
                source,
                removal_reason: None,
            });
        }

        let next = surface.current_index();
        if next >= N {
            return Err(FenceError::InvalidSlot {
                index: next,
                slots: N,
            });
        }
        self.index = next;
        let previous = self.signaled[next];
        if self.fence.completed_value() < previous {
            let wait = logwise::perfwarn_begin!("FenceSynchronizer slot wait");
            self.fence.wait_for(previous)?;
            drop(wait);
        }
        self.target[next] = current + 1;
        Ok(())
    }

    /// Like [Self::advance_and_present], but fills in the removal reason from `device`.
    pub fn advance_and_present_on<S: PresentSurface<D>>(
        &mut self,
        device: &D,
        queue: &D::Queue,
        surface: &mut S,
        sync_interval: u32,
        allow_tear: bool,
    ) -> Result<(), FenceError> {
        match self.advance_and_present(queue, surface, sync_interval, allow_tear) {
            Err(FenceError::Present { source, .. }) => {
                let removal_reason = device.removal_reason();
                if let Some(reason) = &removal_reason {
                    logwise::error_sync!("device removed: {reason}", reason = reason.clone());
                }
                Err(FenceError::Present {
                    source,
                    removal_reason,
                })
            }
            other => other,
        }
    }

    /// Signals the current slot and blocks until the GPU reaches it.  Everything submitted
    /// before this call on `queue` has then completed.
    pub fn block_until_current_slot_done(
        &mut self,
        queue: &D::Queue,
    ) -> Result<Drained, FenceError> {
        let current = self.target[self.index];
        queue.signal(&self.fence, current)?;
        self.signaled[self.index] = current;
        let wait = logwise::perfwarn_begin!("FenceSynchronizer drain");
        self.fence.wait_for(current)?;
        drop(wait);
        self.target[self.index] = current + 1;
        Ok(Drained {
            fence_value: current,
        })
    }

    /// Moves to slot `index` after a drain, for surfaces that restart their ring on resize.
    pub fn restart_at(&mut self, index: usize, drained: Drained) -> Result<(), FenceError> {
        if index >= N {
            return Err(FenceError::InvalidSlot { index, slots: N });
        }
        self.index = index;
        self.target[index] = drained.fence_value() + 1;
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The value slot `slot` will signal next, or `None` if out of range.
    pub fn target(&self, slot: usize) -> Option<u64> {
        self.target.get(slot).copied()
    }

    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    /// Slots whose last signal the GPU has not reached yet.
    pub fn slots_in_flight(&self) -> usize {
        let completed = self.fence.completed_value();
        self.signaled.iter().filter(|&&v| v > completed).count()
    }

    pub fn fence(&self) -> &D::Fence {
        &self.fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Device, QueueClass};
    use crate::imp::soft::{SoftDevice, SoftSurface};
    use std::time::Duration;

    #[test]
    fn init_rejects_out_of_range_slot() {
        let device = SoftDevice::new();
        let r = FenceSynchronizer::<SoftDevice, 2>::new(&device, 2);
        assert!(matches!(r, Err(FenceError::InvalidSlot { index: 2, slots: 2 })));
    }

    #[test]
    fn fence_creation_failure_is_reported() {
        let device = SoftDevice::new();
        device.lose("gone");
        let r = FenceSynchronizer::<SoftDevice, 2>::new(&device, 0);
        assert!(matches!(r, Err(FenceError::Create(_))));
    }

    #[test]
    fn mark_pending_raises_current_target() {
        let device = SoftDevice::new();
        let mut sync = FenceSynchronizer::<SoftDevice, 3>::new(&device, 1).unwrap();
        assert_eq!(sync.target(1), Some(1));
        sync.mark_pending();
        assert_eq!(sync.target(1), Some(2));
        assert_eq!(sync.target(3), None);
    }

    #[test]
    fn drain_completes_everything() {
        let device = SoftDevice::new();
        device.set_latency(Duration::from_millis(2));
        let queue = device.create_queue(QueueClass::Graphics, "g").unwrap();
        let mut sync = FenceSynchronizer::<SoftDevice, 2>::new(&device, 0).unwrap();
        let drained = sync.block_until_current_slot_done(&queue).unwrap();
        assert_eq!(drained.fence_value(), 1);
        assert_eq!(sync.completed_value(), 1);
        assert_eq!(sync.slots_in_flight(), 0);
        assert_eq!(sync.target(0), Some(2));
    }

    #[test]
    fn fence_values_increase_across_slots() {
        let device = SoftDevice::new();
        let queue = device.create_queue(QueueClass::Graphics, "g").unwrap();
        let mut surface = SoftSurface::new(&device, 3, 4, 4).unwrap();
        let mut sync = FenceSynchronizer::<SoftDevice, 3>::new(&device, 0).unwrap();
        let mut last = 0;
        for _ in 0..7 {
            let before = sync.target(sync.index()).unwrap();
            assert!(before > last);
            last = before;
            sync.advance_and_present(&queue, &mut surface, 1, false)
                .unwrap();
        }
        assert!(device.violations().is_empty());
    }

    #[test]
    fn lost_device_stops_pacing() {
        let device = SoftDevice::new();
        let queue = device.create_queue(QueueClass::Graphics, "g").unwrap();
        let mut surface = SoftSurface::new(&device, 2, 4, 4).unwrap();
        let mut sync = FenceSynchronizer::<SoftDevice, 2>::new(&device, 0).unwrap();
        device.lose("hung");
        let r = sync.advance_and_present_on(&device, &queue, &mut surface, 1, false);
        assert!(matches!(r, Err(FenceError::Device(DeviceError::Removed(_)))));
        assert_eq!(sync.index(), 0);
    }

    #[derive(Debug)]
    struct LostSurface;

    impl PresentSurface<SoftDevice> for LostSurface {
        fn buffer_count(&self) -> usize {
            2
        }
        fn current_index(&self) -> usize {
            0
        }
        fn back_buffer(
            &self,
            index: usize,
        ) -> Result<crate::imp::soft::SoftTexture, PresentError> {
            Err(PresentError::NoSuchBuffer(index))
        }
        fn format(&self) -> crate::gpu::Format {
            crate::gpu::Format::Bgra8Unorm
        }
        fn present(
            &mut self,
            _queue: &crate::imp::soft::SoftQueue,
            _sync_interval: u32,
            _allow_tear: bool,
        ) -> Result<(), PresentError> {
            Err(PresentError::DeviceLost("tdr".to_string()))
        }
        fn resize(&mut self, _width: u32, _height: u32) -> Result<(), PresentError> {
            Ok(())
        }
    }

    #[test]
    fn present_failure_is_reported() {
        let device = SoftDevice::new();
        let queue = device.create_queue(QueueClass::Graphics, "g").unwrap();
        let mut sync = FenceSynchronizer::<SoftDevice, 2>::new(&device, 0).unwrap();
        let r = sync.advance_and_present_on(&device, &queue, &mut LostSurface, 1, false);
        assert!(matches!(
            r,
            Err(FenceError::Present {
                source: PresentError::DeviceLost(_),
                removal_reason: None
            })
        ));
    }
}
