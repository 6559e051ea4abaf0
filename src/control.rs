//! The control pipe: a producer → connector channel carrying discriminated
//! messages (spec §4.6).
//!
//! Design Note "Pipe-transported in-memory records" calls out the source's
//! raw struct-cast wire format, and in particular the "pass an fd through
//! the `next` pointer slot" trick used for dump-queue, as the single
//! awkward consequence of that shortcut. Both are replaced here by an
//! explicit enum sent over a `tokio::sync::mpsc` channel; dump-queue
//! carries a `oneshot::Sender<String>` instead of a raw fd.

use std::net::Ipv6Addr;

use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub enum ControlMessage {
    /// Enqueue a new request for `addr`. Equivalent to the source's
    /// "`addr` is non-unspecified" record.
    Enqueue { addr: Ipv6Addr, perm: bool },

    /// Force an immediate reactor pass with no queue mutation. Equivalent
    /// to the source's "`addr` unspecified, `next` null" record.
    Wakeup,

    /// Request a human-readable queue listing. Equivalent to the source's
    /// "`next` carries a target fd" record; the listing is written back
    /// directly instead of to a raw descriptor.
    DumpQueue(oneshot::Sender<String>),
}

pub type ControlSender = mpsc::UnboundedSender<ControlMessage>;
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlMessage>;

/// A cloneable handle producers use to reach the connector. Multiple
/// producers may hold one and send concurrently (spec §4.6); the channel
/// gives each send whole-message delivery, so there is no short-write
/// concern to replicate here.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: ControlSender,
}

impl ControlHandle {
    pub fn new(tx: ControlSender) -> Self {
        Self { tx }
    }

    pub fn enqueue(&self, addr: Ipv6Addr, perm: bool) {
        if self.tx.send(ControlMessage::Enqueue { addr, perm }).is_err() {
            tracing::warn!("Connector control channel is closed, dropping enqueue");
        }
    }

    pub fn wakeup(&self) {
        if self.tx.send(ControlMessage::Wakeup).is_err() {
            tracing::warn!("Connector control channel is closed, dropping wakeup");
        }
    }

    pub async fn dump_queue(&self) -> Option<String> {
        let (reply_tx, reply_rx) = oneshot::channel();

        if self.tx.send(ControlMessage::DumpQueue(reply_tx)).is_err() {
            tracing::warn!("Connector control channel is closed, dropping dump-queue request");
            return None;
        }

        reply_rx.await.ok()
    }
}

pub fn channel() -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle::new(tx), rx)
}
