// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::Shared;
use crate::gpu::{DeviceError, Fence};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

//how often a waiter rechecks for device removal
const REMOVAL_POLL: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct FenceInner {
    completed: Mutex<u64>,
    condvar: Condvar,
    shared: Arc<Shared>,
}

/// A fence completed by a [super::SoftQueue] worker.
#[derive(Debug, Clone)]
pub struct SoftFence(Arc<FenceInner>);

impl SoftFence {
    pub(super) fn new(initial_value: u64, shared: Arc<Shared>) -> Self {
        SoftFence(Arc::new(FenceInner {
            completed: Mutex::new(initial_value),
            condvar: Condvar::new(),
            shared,
        }))
    }

    pub(super) fn complete(&self, value: u64) {
        let mut completed = self.0.completed.lock().unwrap();
        if value < *completed {
            self.0.shared.violation(format!(
                "fence signaled backwards from {} to {}",
                *completed, value
            ));
        } else {
            *completed = value;
        }
        self.0.condvar.notify_all();
    }
}

impl Fence for SoftFence {
    fn completed_value(&self) -> u64 {
        *self.0.completed.lock().unwrap()
    }

    fn wait_for(&self, value: u64) -> Result<(), DeviceError> {
        let mut completed = self.0.completed.lock().unwrap();
        while *completed < value {
            if let Some(reason) = self.0.shared.removed() {
                return Err(DeviceError::Removed(reason));
            }
            let (guard, _) = self
                .0
                .condvar
                .wait_timeout(completed, REMOVAL_POLL)
                .unwrap();
            completed = guard;
        }
        Ok(())
    }
}
