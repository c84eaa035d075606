// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::command::Batch;
use super::fence::SoftFence;
use super::resource::SoftTexture;
use super::{Shared, SoftCommandList, SoftDevice};
use crate::gpu::{DeviceError, Queue, QueueClass, ResourceState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

enum Job {
    Execute(Batch),
    Signal(SoftFence, u64),
    Present(SoftTexture),
    Stop,
}

/// Lets tests pause a queue so work stays pending.
#[derive(Debug, Default)]
struct Gate {
    held: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn set(&self, held: bool) {
        *self.held.lock().unwrap() = held;
        self.condvar.notify_all();
    }

    fn wait_open(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.condvar.wait(held).unwrap();
        }
    }
}

/**
A queue executing on its own thread.

Jobs run strictly in submission order.
*/
#[derive(Debug)]
pub struct SoftQueue {
    class: QueueClass,
    label: String,
    sender: Sender<Job>,
    gate: Arc<Gate>,
    presented: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Execute(batch) => write!(f, "Execute({})", batch.label),
            Job::Signal(_, value) => write!(f, "Signal({value})"),
            Job::Present(texture) => write!(f, "Present({})", texture.label()),
            Job::Stop => write!(f, "Stop"),
        }
    }
}

fn run(receiver: Receiver<Job>, gate: Arc<Gate>, presented: Arc<AtomicU64>, shared: Arc<Shared>) {
    while let Ok(job) = receiver.recv() {
        gate.wait_open();
        logwise::trace_sync!("soft queue job {job}", job = logwise::privacy::LogIt(&job));
        let removed = shared.removed().is_some();
        match job {
            Job::Stop => break,
            Job::Execute(batch) => {
                if removed {
                    batch.abandon();
                    continue;
                }
                let latency = shared.latency();
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                batch.execute(&shared);
            }
            Job::Signal(fence, value) => {
                if !removed {
                    fence.complete(value);
                }
            }
            Job::Present(texture) => {
                if texture.state() != ResourceState::Present {
                    shared.violation(format!(
                        "presented {} in state {:?}",
                        texture.label(),
                        texture.state()
                    ));
                }
                presented.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

impl SoftQueue {
    pub(super) fn new(
        class: QueueClass,
        label: &str,
        shared: Arc<Shared>,
    ) -> Result<Self, DeviceError> {
        let (sender, receiver) = mpsc::channel();
        let gate = Arc::new(Gate::default());
        let presented = Arc::new(AtomicU64::new(0));
        let worker = {
            let gate = gate.clone();
            let presented = presented.clone();
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("soft_queue_{label}"))
                .spawn(move || run(receiver, gate, presented, shared))
                .map_err(|e| DeviceError::Backend(format!("can't spawn queue thread: {e}")))?
        };
        Ok(SoftQueue {
            class,
            label: label.to_string(),
            sender,
            gate,
            presented,
            worker: Some(worker),
            shared,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stops executing jobs until [Self::release].
    pub fn hold(&self) {
        self.gate.set(true);
    }

    pub fn release(&self) {
        self.gate.set(false);
    }

    /// Presents the queue has executed.
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }

    fn send(&self, job: Job) -> Result<(), DeviceError> {
        self.sender
            .send(job)
            .map_err(|_| DeviceError::Backend(format!("queue {} has stopped", self.label)))
    }

    pub(super) fn enqueue_present(&self, texture: SoftTexture) -> Result<(), DeviceError> {
        self.send(Job::Present(texture))
    }
}

impl Queue<SoftDevice> for SoftQueue {
    fn class(&self) -> QueueClass {
        self.class
    }

    fn submit(&self, list: &SoftCommandList) -> Result<(), DeviceError> {
        use crate::gpu::CommandList;
        if let Some(reason) = self.shared.removed() {
            return Err(DeviceError::Removed(reason));
        }
        if !list.is_closed() {
            let message = format!("{}: submitted while open", list.label());
            self.shared.violation(message.clone());
            return Err(DeviceError::Validation(message));
        }
        if list.class() != self.class {
            let message = format!(
                "{}: {:?} list submitted to {:?} queue {}",
                list.label(),
                list.class(),
                self.class,
                self.label
            );
            self.shared.violation(message.clone());
            return Err(DeviceError::Validation(message));
        }
        self.send(Job::Execute(list.batch()))
    }

    fn signal(&self, fence: &SoftFence, value: u64) -> Result<(), DeviceError> {
        if let Some(reason) = self.shared.removed() {
            return Err(DeviceError::Removed(reason));
        }
        self.send(Job::Signal(fence.clone(), value))
    }
}

impl Drop for SoftQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(Job::Stop);
        self.gate.set(false);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
