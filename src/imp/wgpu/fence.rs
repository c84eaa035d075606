// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::WgpuDevice;
use crate::gpu::{DeviceError, Fence};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct FenceInner {
    completed: Mutex<u64>,
    condvar: Condvar,
    device: WgpuDevice,
}

/**
A monotonic fence.

wgpu has no fence object; signals register a completion callback on the queue, and the callback
raises the completed value.
*/
#[derive(Debug, Clone)]
pub struct WgpuFence(Arc<FenceInner>);

impl WgpuFence {
    pub(super) fn new(device: WgpuDevice, initial_value: u64) -> Self {
        WgpuFence(Arc::new(FenceInner {
            completed: Mutex::new(initial_value),
            condvar: Condvar::new(),
            device,
        }))
    }

    pub(super) fn complete(&self, value: u64) {
        let mut completed = self.0.completed.lock().unwrap();
        *completed = (*completed).max(value);
        self.0.condvar.notify_all();
    }
}

impl Fence for WgpuFence {
    fn completed_value(&self) -> u64 {
        *self.0.completed.lock().unwrap()
    }

    fn wait_for(&self, value: u64) -> Result<(), DeviceError> {
        let mut completed = self.0.completed.lock().unwrap();
        while *completed < value {
            self.0.device.check_removed()?;
            self.0.device.set_needs_poll();
            completed = self
                .0
                .condvar
                .wait_timeout(completed, POLL_INTERVAL)
                .unwrap()
                .0;
        }
        Ok(())
    }
}
