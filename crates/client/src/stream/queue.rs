//! Bounded outbound frame queue between logical send and the writer task

use crate::errors::{ExchangeError, Result};

use flume::{Receiver, Sender, TrySendError};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue without waiting; a full queue is reported to the caller
    pub fn enqueue(&self, frame: impl Into<String>) -> Result<()> {
        match self.tx.try_send(frame.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full ({} frames), rejecting send", self.capacity);
                Err(ExchangeError::QueueFull(self.capacity))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(ExchangeError::NotConnected("outbound queue closed".to_string()))
            }
        }
    }

    /// Receiving end for the writer task
    pub fn receiver(&self) -> Receiver<String> {
        self.rx.clone()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard pending frames; returns how many were dropped
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}
