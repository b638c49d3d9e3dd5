use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StompError;

/// Header names used by the client.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const TRANSACTION: &str = "transaction";
    pub const VERSION: &str = "version";
}

/// Versions offered in the CONNECT frame.
pub const ACCEPT_VERSIONS: &str = "1.0,1.1,1.2";

/// The STOMP verbs this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Every recognized command, in protocol order.
    pub const ALL: [Command; 15] = [
        Command::Connect,
        Command::Stomp,
        Command::Connected,
        Command::Send,
        Command::Subscribe,
        Command::Unsubscribe,
        Command::Ack,
        Command::Nack,
        Command::Begin,
        Command::Commit,
        Command::Abort,
        Command::Disconnect,
        Command::Message,
        Command::Receipt,
        Command::Error,
    ];

    /// The wire spelling of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED keep the legacy STOMP 1.0 header encoding:
    /// only backslash is escaped.
    pub fn uses_legacy_escaping(&self) -> bool {
        matches!(self, Command::Connect | Command::Connected)
    }

    /// Parse a command from raw wire bytes (CR already stripped).
    pub fn from_bytes(raw: &[u8]) -> Result<Self, StompError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().as_bytes() == raw)
            .ok_or_else(|| {
                StompError::InvalidCommand(format!(
                    "not a STOMP command: {}",
                    String::from_utf8_lossy(raw)
                ))
            })
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocate a process-unique receipt id.
pub fn next_receipt_id() -> String {
    static RECEIPT_COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("rcpt-{}", RECEIPT_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// A single STOMP frame.
///
/// `Frame` contains the command, an ordered list of headers (key/value
/// pairs) and the raw body bytes. Duplicate header keys are kept in the
/// list, but every lookup returns the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: Command,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes; empty when the frame carries no content
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Request a receipt for this frame using the given id (builder style).
    pub fn receipt(self, receipt_id: impl Into<String>) -> Self {
        self.header(headers::RECEIPT, receipt_id)
    }

    /// Request a receipt using a freshly allocated id (builder style).
    pub fn with_receipt(self) -> Self {
        self.receipt(next_receipt_id())
    }

    /// Append a header in place. Used to attach receipt or subscription ids
    /// to a frame that has already been built.
    pub fn push_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push((key.into(), value.into()));
    }

    /// Get the value of a header by name.
    ///
    /// Returns the first header value matching the given key (case-sensitive),
    /// or `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, key: &str) -> bool {
        self.get_header(key).is_some()
    }

    /// The receipt id this frame refers to: the `receipt` header on frames
    /// we send, or `receipt-id` on RECEIPT/ERROR frames we receive.
    pub fn receipt_id(&self) -> Option<&str> {
        self.get_header(headers::RECEIPT)
            .or_else(|| self.get_header(headers::RECEIPT_ID))
    }

    /// Whether the sender asked the broker to confirm this frame.
    pub fn expects_receipt(&self) -> bool {
        self.has_header(headers::RECEIPT)
    }

    pub fn is_error(&self) -> bool {
        self.command == Command::Error
    }

    pub fn is_message(&self) -> bool {
        self.command == Command::Message
    }

    /// Parsed `content-length` header.
    ///
    /// Returns `Ok(None)` when absent and `MalformedFrame` when present but
    /// not a non-negative integer.
    pub fn content_length(&self) -> Result<Option<usize>, StompError> {
        match self.get_header(headers::CONTENT_LENGTH) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<usize>().map(Some).map_err(|_| {
                StompError::MalformedFrame(format!("malformed content-length header: {}", raw))
            }),
        }
    }

    /// Build the ACK for this frame, if the broker asked for one.
    ///
    /// Brokers using automatic acknowledgement omit the `ack` header; in that
    /// case there is nothing to acknowledge and `None` is returned.
    pub fn ack_frame(&self) -> Option<Frame> {
        self.acknowledgement(Command::Ack)
    }

    /// Build the NACK for this frame, if the broker asked for one.
    pub fn nack_frame(&self) -> Option<Frame> {
        self.acknowledgement(Command::Nack)
    }

    fn acknowledgement(&self, command: Command) -> Option<Frame> {
        let ack = self.get_header(headers::ACK)?;
        Some(Frame::new(command).header(headers::ID, ack).with_receipt())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}
