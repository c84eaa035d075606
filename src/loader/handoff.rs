// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
One-shot delivery of a finished payload.

The loader's worker owns the [Handoff] and consumes it exactly once when it stops.  The consumer
keeps the [PayloadReceiver] and picks the payload up on its own thread, by polling or by awaiting.
Nothing of the consumer runs on the worker.

Dropping the receiver is how a consumer says it is gone; the worker logs that and drops the
payload.  Dropping a handoff without delivering (a loader that was never started) resolves the
receiver with [HandoffError::Abandoned].
*/

use super::Payload;
use crate::gpu::Device;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandoffError {
    #[error("The loader stopped without delivering a payload")]
    Abandoned,
    #[error("The payload was already received")]
    AlreadyReceived,
}

type PayloadFuture<D> = Pin<Box<dyn Future<Output = Option<Payload<D>>> + Send>>;

/// The sending half.  See [handoff].
pub struct Handoff<D: Device> {
    sender: Option<r#continue::Sender<Option<Payload<D>>>>,
    receiver_alive: Weak<()>,
}

/// The receiving half.  See [handoff].
pub struct PayloadReceiver<D: Device> {
    future: Option<PayloadFuture<D>>,
    _alive: Arc<()>,
}

/// Creates a connected handoff pair.
pub fn handoff<D: Device>() -> (Handoff<D>, PayloadReceiver<D>) {
    let (sender, future) = r#continue::continuation();
    let alive = Arc::new(());
    (
        Handoff {
            sender: Some(sender),
            receiver_alive: Arc::downgrade(&alive),
        },
        PayloadReceiver {
            future: Some(Box::pin(future)),
            _alive: alive,
        },
    )
}

impl<D: Device> Handoff<D> {
    /// Whether the receiving half still exists.
    pub fn receiver_alive(&self) -> bool {
        self.receiver_alive.strong_count() > 0
    }

    /// Delivers `payload`, consuming the handoff.
    pub fn deliver(mut self, payload: Payload<D>) {
        if !self.receiver_alive() {
            logwise::warn_sync!(
                "payload consumer is gone; dropping {n} textures",
                n = payload.len()
            );
        } else {
            logwise::info_sync!("delivering payload of {n} textures", n = payload.len());
        }
        if let Some(sender) = self.sender.take() {
            sender.send(Some(payload));
        }
    }
}

impl<D: Device> Drop for Handoff<D> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.send(None);
        }
    }
}

impl<D: Device> std::fmt::Debug for Handoff<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("delivered", &self.sender.is_none())
            .field("receiver_alive", &self.receiver_alive())
            .finish()
    }
}

impl<D: Device> PayloadReceiver<D> {
    /// Returns the payload if it has arrived, `Ok(None)` if not yet.
    pub fn try_receive(&mut self) -> Result<Option<Payload<D>>, HandoffError> {
        let future = self.future.as_mut().ok_or(HandoffError::AlreadyReceived)?;
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => Ok(None),
            Poll::Ready(result) => {
                self.future = None;
                result.map(Some).ok_or(HandoffError::Abandoned)
            }
        }
    }

    /// Waits for the payload.
    pub async fn receive(mut self) -> Result<Payload<D>, HandoffError> {
        let future = self.future.take().ok_or(HandoffError::AlreadyReceived)?;
        future.await.ok_or(HandoffError::Abandoned)
    }

    /// Blocks the calling thread until the payload arrives.
    pub fn wait(self) -> Result<Payload<D>, HandoffError> {
        test_executors::sleep_on(self.receive())
    }
}

impl<D: Device> std::fmt::Debug for PayloadReceiver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadReceiver")
            .field("received", &self.future.is_none())
            .finish()
    }
}
