use std::sync::Arc;

use crate::config::{Destinations, Settings};
use crate::connection::Connection;
use crate::error::StompError;
use crate::frame::{Command, Frame, headers};
use crate::message::Message;
use crate::session::{AckMode, Session};
use crate::subscription::Subscription;

/// A connected STOMP client.
///
/// Bundles a `Connection` with the `Session` negotiated on it and exposes the
/// everyday operations: send, subscribe, consume and disconnect.
///
/// Example
/// ```ignore
/// let transport = Transport::connect(Settings::new("localhost", 61613)).await?;
/// let sub = transport.subscribe("/queue/orders", Some(AckMode::Client)).await?;
/// transport.send("/queue/orders", "text/plain", "hello", Vec::new(), true).await?;
/// if let Some(msg) = sub.next(Duration::from_secs(1)).await {
///     msg.accept().await?;
/// }
/// transport.close().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Transport {
    connection: Connection,
    session: Session,
}

impl Transport {
    /// Connect and complete the handshake.
    pub async fn connect(settings: Settings) -> Result<Self, StompError> {
        let (connection, session) = Connection::connect(settings).await?;
        Ok(Self {
            connection,
            session,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        self.connection.settings()
    }

    /// Send a message.
    ///
    /// Parameters
    /// - `destinations`: one address or several, joined with the configured
    ///   separator.
    /// - `content_type`: value of the `content-type` header.
    /// - `body`: message body.
    /// - `extra_headers`: additional headers (a `transaction` header places
    ///   the send inside a transaction). `destination` and `content-type`
    ///   entries are ignored.
    /// - `receipt`: wait for the broker to confirm, with the connection's
    ///   retry policy.
    pub async fn send(
        &self,
        destinations: impl Into<Destinations>,
        content_type: &str,
        body: impl Into<Vec<u8>>,
        extra_headers: Vec<(String, String)>,
        receipt: bool,
    ) -> Result<(), StompError> {
        let mut frame = Frame::new(Command::Send);
        for (k, v) in extra_headers {
            if k == headers::DESTINATION || k == headers::CONTENT_TYPE {
                continue;
            }
            frame.push_header(k, v);
        }
        let frame = frame
            .header(headers::CONTENT_TYPE, content_type)
            .header(
                headers::DESTINATION,
                self.connection.join_destination(destinations),
            )
            .set_body(body);
        let frame = if receipt { frame.with_receipt() } else { frame };
        self.connection.send_frame(frame).await
    }

    pub async fn subscribe(
        &self,
        destinations: impl Into<Destinations>,
        ack: Option<AckMode>,
    ) -> Result<Arc<Subscription>, StompError> {
        self.session.subscribe(destinations, ack).await
    }

    pub async fn subscribe_with_headers(
        &self,
        destinations: impl Into<Destinations>,
        ack: Option<AckMode>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Arc<Subscription>, StompError> {
        self.session
            .subscribe_with_headers(destinations, ack, extra_headers)
            .await
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), StompError> {
        self.session.unsubscribe(subscription).await
    }

    pub async fn unsubscribe_all(&self) -> Result<(), StompError> {
        self.session.unsubscribe_all().await
    }

    /// Drain every message queued on every subscription.
    pub fn messages(&self) -> Vec<Message> {
        self.session
            .subscriptions()
            .list()
            .iter()
            .flat_map(|sub| sub.messages())
            .collect()
    }

    pub async fn begin(&self, transaction: &str) -> Result<(), StompError> {
        self.connection.begin(transaction).await
    }

    pub async fn commit(&self, transaction: &str) -> Result<(), StompError> {
        self.connection.commit(transaction).await
    }

    pub async fn abort(&self, transaction: &str) -> Result<(), StompError> {
        self.connection.abort(transaction).await
    }

    /// Disconnect from the broker. See `Connection::close`.
    pub async fn close(&self) -> Result<(), StompError> {
        self.connection.close().await
    }
}
