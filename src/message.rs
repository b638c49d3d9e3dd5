use std::sync::Arc;

use crate::connection::{Connection, WeakConnection, split_destinations};
use crate::error::StompError;
use crate::frame::{Frame, headers};

/// Builds a `Message` from an inbound MESSAGE frame.
///
/// The default is `Message::from_frame`; a custom factory can be supplied in
/// `Settings::message_factory` to validate or enrich messages. An error makes
/// the frame unroutable and it is left on the connection's generic queue.
pub type MessageFactory =
    Arc<dyn Fn(&Connection, Frame) -> Result<Message, StompError> + Send + Sync>;

/// A message delivered to a subscription.
#[derive(Debug, Clone)]
pub struct Message {
    connection: WeakConnection,
    subscription: String,
    destinations: Vec<String>,
    message_id: String,
    content_type: Option<String>,
    content_length: Option<usize>,
    frame: Frame,
}

impl Message {
    /// Validate a MESSAGE frame and wrap it.
    ///
    /// The frame must carry `destination`, `message-id` and `subscription`;
    /// `content-type` and `content-length` are optional but a present
    /// `content-length` must be an integer. Anything else is
    /// `MalformedFrame`.
    pub fn from_frame(connection: &Connection, frame: Frame) -> Result<Message, StompError> {
        let separator = connection.settings().dest_separator.clone();
        Self::build(connection.downgrade(), frame, &separator)
    }

    /// Like `from_frame`, but not bound to a connection. `accept` and
    /// `reject` on the result fail with `ConnectionClosed` when there is
    /// something to acknowledge.
    pub fn detached(frame: Frame, dest_separator: &str) -> Result<Message, StompError> {
        Self::build(WeakConnection::default(), frame, dest_separator)
    }

    fn build(
        connection: WeakConnection,
        frame: Frame,
        dest_separator: &str,
    ) -> Result<Message, StompError> {
        if !frame.is_message() {
            return Err(StompError::MalformedFrame(format!(
                "expected MESSAGE, got {}",
                frame.command
            )));
        }
        let required = |name: &str| {
            frame
                .get_header(name)
                .map(str::to_string)
                .ok_or_else(|| {
                    StompError::MalformedFrame(format!("MESSAGE without {} header", name))
                })
        };
        let destination = required(headers::DESTINATION)?;
        let message_id = required(headers::MESSAGE_ID)?;
        let subscription = required(headers::SUBSCRIPTION)?;
        let content_type = frame.get_header(headers::CONTENT_TYPE).map(str::to_string);
        let content_length = frame.content_length()?;

        Ok(Message {
            connection,
            subscription,
            destinations: split_destinations(&destination, dest_separator),
            message_id,
            content_type,
            content_length,
            frame,
        })
    }

    /// Id of the subscription the message was delivered to.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn body(&self) -> &[u8] {
        &self.frame.body
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.frame.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.frame.headers
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// Acknowledge the message.
    ///
    /// Sends ACK (with a receipt request) only when the broker asked for one
    /// through the `ack` header; otherwise this is a no-op.
    pub async fn accept(&self) -> Result<(), StompError> {
        self.acknowledge(self.frame.ack_frame()).await
    }

    /// Reject the message with NACK, under the same rule as `accept`.
    pub async fn reject(&self) -> Result<(), StompError> {
        self.acknowledge(self.frame.nack_frame()).await
    }

    async fn acknowledge(&self, frame: Option<Frame>) -> Result<(), StompError> {
        let Some(frame) = frame else {
            return Ok(());
        };
        let conn = self.connection.upgrade().ok_or_else(|| {
            StompError::ConnectionClosed("message is not bound to a live connection".to_string())
        })?;
        conn.send_frame(frame).await
    }
}
