// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{WgpuCommandList, WgpuDevice, WgpuFence};
use crate::gpu::{CommandList, DeviceError, Queue, QueueClass};
use std::sync::atomic::Ordering;

/// A queue of one class, submitting to the device's single wgpu queue.
#[derive(Debug)]
pub struct WgpuQueue {
    device: WgpuDevice,
    class: QueueClass,
    label: String,
}

impl WgpuQueue {
    pub(super) fn new(device: WgpuDevice, class: QueueClass, label: &str) -> Self {
        WgpuQueue {
            device,
            class,
            label: label.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Queue<WgpuDevice> for WgpuQueue {
    fn class(&self) -> QueueClass {
        self.class
    }

    fn submit(&self, list: &WgpuCommandList) -> Result<(), DeviceError> {
        self.device.check_removed()?;
        if list.class() != self.class {
            return Err(DeviceError::Validation(format!(
                "{}: {:?} list submitted to {:?} queue {}",
                list.label(),
                list.class(),
                self.class,
                self.label
            )));
        }
        let buffer = list.take_finished().ok_or_else(|| {
            DeviceError::Validation(format!("{}: submitted without being closed", list.label()))
        })?;
        let in_flight = list.begin_flight();
        let queue = self.device.queue();
        queue.submit(std::iter::once(buffer));
        queue.on_submitted_work_done(move || {
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
        self.device.set_needs_poll();
        Ok(())
    }

    fn signal(&self, fence: &WgpuFence, value: u64) -> Result<(), DeviceError> {
        self.device.check_removed()?;
        let fence = fence.clone();
        self.device.queue().on_submitted_work_done(move || {
            fence.complete(value);
        });
        self.device.set_needs_poll();
        Ok(())
    }
}
