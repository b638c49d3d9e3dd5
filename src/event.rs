//! Frame observers.
//!
//! The connection tells every registered observer about each frame it sends
//! and each frame the background task receives. Receipt tracking and
//! subscription routing are both observers.

use crate::frame::Frame;

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Decoded from the socket by the background task
    Received,
    /// About to be written by `Connection::send_frame`
    Sent,
}

/// An observer's verdict on a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Let the frame continue to later observers and the generic queue
    Continue,
    /// The frame was fully handled; do not queue it
    Discard,
}

impl Dispatch {
    pub fn is_discard(&self) -> bool {
        matches!(self, Dispatch::Discard)
    }
}

/// Receives frame events from a `Connection`.
///
/// Implementations are called from the background task for `Received` and
/// from the sending task for `Sent`, so they must not block. The return value
/// is ignored for `Sent`.
pub trait FrameObserver: Send + Sync {
    fn notify(&self, event: FrameEvent, frame: &Frame) -> Dispatch;
}

impl<F> FrameObserver for F
where
    F: Fn(FrameEvent, &Frame) -> Dispatch + Send + Sync,
{
    fn notify(&self, event: FrameEvent, frame: &Frame) -> Dispatch {
        self(event, frame)
    }
}
