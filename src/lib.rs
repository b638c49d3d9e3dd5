//! Async STOMP 1.2 client with receipt confirmation and deduplicating
//! subscriptions.
//!
//! `Transport::connect` opens a connection, performs the handshake and
//! returns a client that can send, subscribe and consume. The lower layers
//! (`Connection`, `Session`, the codecs) are public for callers that need
//! more control.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod frame;
pub mod message;
mod parser;
pub mod receipt;
pub mod session;
pub mod subscription;
pub mod transport;

pub use codec::{Codec, Frames, LineEnding, StompCodec, StompItem, escape_header};
pub use config::{Destinations, Settings, negotiate_heartbeats, parse_heartbeat_header};
pub use connection::{Connection, WeakConnection};
pub use error::{ErrorKind, ServerError, StompError};
pub use event::{Dispatch, FrameEvent, FrameObserver};
pub use frame::{Command, Frame};
pub use message::{Message, MessageFactory};
pub use receipt::{Receipt, ReceiptWaiter};
pub use session::{AckMode, Session};
pub use subscription::{Subscription, SubscriptionRegistry};
pub use transport::Transport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_frame_display() {
        let f = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .set_body(b"hello".to_vec());
        let s = format!("{}", f);
        assert!(s.contains("CONNECT"));
        assert!(s.contains("Body (5 bytes)"));
    }
}
