use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::frame::{Frame, headers};

/// Whether retrying the failed operation can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structurally broken input or a programming error; retrying the same
    /// operation will fail the same way.
    Fatal,
    /// A broker-side refusal, a timeout or a transport failure; the caller
    /// may retry, reconnect or report.
    Retryable,
}

/// Errors returned by codec, connection and session operations.
///
/// The type is `Clone` so that an error observed by the background task can
/// be handed to every caller that blocks afterwards.
#[derive(Error, Debug, Clone)]
pub enum StompError {
    /// Unrecognized verb on encode or decode
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// Truncated stream, bad content-length, body/terminator mismatch
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// ERROR frame received from the broker
    #[error("protocol error: {0}")]
    Protocol(ServerError),
    /// Receipt not confirmed within the retry budget
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
    /// A bounded wait elapsed without a result
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// The connection's background task has stopped
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    /// The broker answered with a frame we did not expect at this point
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),
    /// A subscription with this id is already registered
    #[error("duplicate subscription id: {0}")]
    DuplicateSubscription(String),
    /// I/O-level error
    #[error("io error: {0}")]
    Io(Arc<io::Error>),
}

impl StompError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StompError::InvalidCommand(_)
            | StompError::MalformedFrame(_)
            | StompError::UnexpectedFrame(_)
            | StompError::DuplicateSubscription(_) => ErrorKind::Fatal,
            StompError::Protocol(_)
            | StompError::ReceiptTimeout(_)
            | StompError::Timeout(_)
            | StompError::ConnectionClosed(_)
            | StompError::Io(_) => ErrorKind::Retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

impl From<io::Error> for StompError {
    fn from(err: io::Error) -> Self {
        StompError::Io(Arc::new(err))
    }
}

impl From<ServerError> for StompError {
    fn from(err: ServerError) -> Self {
        StompError::Protocol(err)
    }
}

/// The contents of an ERROR frame sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Value of the `message` header, or "unknown error"
    pub message: String,
    /// Body decoded as UTF-8 (lossy), if any
    pub body: Option<String>,
    /// The `receipt-id` the error refers to, if any
    pub receipt_id: Option<String>,
    /// The complete ERROR frame
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header(headers::MESSAGE)
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&frame.body).into_owned())
        };
        let receipt_id = frame.get_header(headers::RECEIPT_ID).map(str::to_string);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, " ({})", body.trim_end())?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
