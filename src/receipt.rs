use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::StompError;
use crate::event::{Dispatch, FrameEvent, FrameObserver};
use crate::frame::{Command, Frame};

/// Wait handle for a single outstanding receipt.
///
/// Confirmation is sticky: once set, every later `wait` returns immediately,
/// so a RECEIPT that arrives before anyone waits is not lost.
#[derive(Debug, Default)]
pub struct Receipt {
    confirmed: AtomicBool,
    notify: Notify,
}

impl Receipt {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }

    fn confirm(&self) {
        self.confirmed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Wait up to `timeout` for confirmation. Returns whether the receipt
    /// has been confirmed.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.is_confirmed() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, async {
            while !self.is_confirmed() {
                self.notify.notified().await;
            }
        })
        .await;
        self.is_confirmed()
    }
}

/// Tracks receipts requested by outgoing frames.
///
/// Registered as an observer on the connection: a sent frame carrying a
/// `receipt` header creates an entry, and the matching RECEIPT frame removes
/// it, wakes the waiter and is discarded from the generic queue.
#[derive(Debug, Default)]
pub struct ReceiptWaiter {
    pending: Mutex<HashMap<String, Arc<Receipt>>>,
}

impl ReceiptWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `receipt_id`, keeping an existing registration so that a
    /// late RECEIPT for an earlier attempt still counts.
    pub fn register(&self, receipt_id: &str) -> Arc<Receipt> {
        self.pending
            .lock()
            .entry(receipt_id.to_string())
            .or_default()
            .clone()
    }

    /// The wait handle for a registered receipt.
    pub fn handle(&self, receipt_id: &str) -> Option<Arc<Receipt>> {
        self.pending.lock().get(receipt_id).cloned()
    }

    /// Wait for `receipt_id` to be confirmed.
    ///
    /// An id that is not (or no longer) registered cannot be confirmed and
    /// fails with `ReceiptTimeout` straight away.
    pub async fn wait(&self, receipt_id: &str, timeout: Duration) -> Result<(), StompError> {
        let Some(handle) = self.handle(receipt_id) else {
            return Err(StompError::ReceiptTimeout(receipt_id.to_string()));
        };
        if handle.wait(timeout).await {
            Ok(())
        } else {
            Err(StompError::ReceiptTimeout(receipt_id.to_string()))
        }
    }

    /// Drop a registration that will never be waited on again.
    pub fn forget(&self, receipt_id: &str) {
        self.pending.lock().remove(receipt_id);
    }

    /// Number of receipts still outstanding.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }
}

impl FrameObserver for ReceiptWaiter {
    fn notify(&self, event: FrameEvent, frame: &Frame) -> Dispatch {
        match event {
            FrameEvent::Sent => {
                if let Some(id) = frame.get_header(crate::frame::headers::RECEIPT) {
                    self.register(id);
                }
                Dispatch::Continue
            }
            FrameEvent::Received if frame.command == Command::Receipt => {
                let Some(id) = frame.receipt_id() else {
                    return Dispatch::Continue;
                };
                let removed = self.pending.lock().remove(id);
                match removed {
                    Some(handle) => {
                        debug!(receipt_id = id, "receipt confirmed");
                        handle.confirm();
                        Dispatch::Discard
                    }
                    None => Dispatch::Continue,
                }
            }
            FrameEvent::Received => Dispatch::Continue,
        }
    }
}
