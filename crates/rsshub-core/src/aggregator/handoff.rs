//! Unbuffered handoff between the scheduler and the worker pool.
//!
//! A receiver registers a one-shot slot and parks on it; a sender waits for the
//! next registered slot and fills it. Nothing is ever stored in the queue
//! itself, so `send` only completes once a worker is actually waiting.

use tokio::sync::{mpsc, oneshot, Mutex};

pub struct Handoff<T> {
    slots_tx: mpsc::UnboundedSender<oneshot::Sender<T>>,
    slots_rx: Mutex<mpsc::UnboundedReceiver<oneshot::Sender<T>>>,
}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        let (slots_tx, slots_rx) = mpsc::unbounded_channel();
        Self {
            slots_tx,
            slots_rx: Mutex::new(slots_rx),
        }
    }

    /// Wait until a receiver is parked and hand `item` to it.
    ///
    /// Slots left behind by receivers that gave up are skipped. Dropping the
    /// returned future drops the item.
    pub async fn send(&self, mut item: T) {
        let mut slots = self.slots_rx.lock().await;
        while let Some(slot) = slots.recv().await {
            match slot.send(item) {
                Ok(()) => return,
                Err(returned) => item = returned,
            }
        }
    }

    /// Park until a sender hands over an item.
    ///
    /// Cancel-safe up to the moment a sender fills the slot: an item handed
    /// over to a receiver that is dropped before being polled again is lost.
    pub async fn recv(&self) -> Option<T> {
        let (slot, parked) = oneshot::channel();
        self.slots_tx.send(slot).ok()?;
        parked.await.ok()
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}
