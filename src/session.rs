use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Destinations, parse_heartbeat_header};
use crate::connection::Connection;
use crate::error::StompError;
use crate::frame::{Command, Frame, headers};
use crate::subscription::{Subscription, SubscriptionRegistry, next_subscription_id};

/// Subscription acknowledgement modes as defined by STOMP 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(format!("unknown ack mode: {}", other)),
        }
    }
}

/// The state negotiated by a successful handshake, and the entry point for
/// subscribing.
///
/// One `Session` exists per connection. It owns the subscription registry,
/// which is registered as an observer on the connection when the session is
/// created.
#[derive(Debug, Clone)]
pub struct Session {
    connection: Connection,
    version: String,
    send_heartbeat_ms: u64,
    recv_heartbeat_ms: u64,
    server: Option<String>,
    session: Option<String>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Session {
    /// Build a session from the broker's CONNECTED frame.
    ///
    /// `version` defaults to "1.0" when the broker does not send one. The
    /// heartbeat values are the broker's, parsed leniently.
    pub fn from_frame(connection: Connection, frame: &Frame) -> Session {
        let version = frame
            .get_header(headers::VERSION)
            .unwrap_or("1.0")
            .to_string();
        let (send_heartbeat_ms, recv_heartbeat_ms) = frame
            .get_header(headers::HEART_BEAT)
            .map(parse_heartbeat_header)
            .unwrap_or((0, 0));

        let settings = connection.settings();
        let subscriptions = Arc::new(SubscriptionRegistry::new(
            connection.downgrade(),
            settings.message_factory.clone(),
            settings.seen_capacity,
        ));
        connection.register_observer(subscriptions.clone());

        Session {
            version,
            send_heartbeat_ms,
            recv_heartbeat_ms,
            server: frame.get_header(headers::SERVER).map(str::to_string),
            session: frame.get_header(headers::SESSION).map(str::to_string),
            subscriptions,
            connection,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Heartbeat interval (ms) the broker sends, per its CONNECTED frame.
    pub fn send_heartbeat_ms(&self) -> u64 {
        self.send_heartbeat_ms
    }

    /// Heartbeat interval (ms) the broker expects to receive.
    pub fn recv_heartbeat_ms(&self) -> u64 {
        self.recv_heartbeat_ms
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Broker-assigned session identifier.
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Subscribe with a generated id and no extra headers.
    pub async fn subscribe(
        &self,
        destinations: impl Into<Destinations>,
        ack: Option<AckMode>,
    ) -> Result<Arc<Subscription>, StompError> {
        self.subscribe_with_id(next_subscription_id(), destinations, ack, Vec::new())
            .await
    }

    /// Subscribe with extra SUBSCRIBE headers (selectors, prefetch and the
    /// like). `id` and `destination` entries in `extra_headers` are ignored.
    pub async fn subscribe_with_headers(
        &self,
        destinations: impl Into<Destinations>,
        ack: Option<AckMode>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Arc<Subscription>, StompError> {
        self.subscribe_with_id(next_subscription_id(), destinations, ack, extra_headers)
            .await
    }

    /// Subscribe under a caller-chosen id.
    ///
    /// The subscription is registered before SUBSCRIBE goes out so a MESSAGE
    /// arriving ahead of the RECEIPT is routed to it, and the handle is
    /// returned only once the broker has confirmed. Until then it is left
    /// out of `SubscriptionRegistry::list` (and so `Transport::messages`).
    /// If the broker answers with ERROR, or never confirms, the registration
    /// is removed and the error returned; messages routed to it in the
    /// meantime are dropped with it.
    pub async fn subscribe_with_id(
        &self,
        id: impl Into<String>,
        destinations: impl Into<Destinations>,
        ack: Option<AckMode>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Arc<Subscription>, StompError> {
        let id = id.into();
        let destinations = destinations.into();
        let destination = self.connection.join_destination(destinations.clone());

        let mut frame = Frame::new(Command::Subscribe);
        for (k, v) in extra_headers {
            if k == headers::ID || k == headers::DESTINATION {
                continue;
            }
            frame.push_header(k, v);
        }
        frame = frame
            .header(headers::ID, id.as_str())
            .header(headers::DESTINATION, destination.as_str());
        if let Some(ack) = ack {
            frame = frame.header(headers::ACK, ack.as_str());
        }
        let frame = frame.with_receipt();

        let _claim = self.connection.claim().await;
        let sub = self.subscriptions.add(id.as_str(), destinations.into_vec())?;
        if let Err(e) = self.connection.send_frame(frame).await {
            warn!(subscription = %id, "subscribe to {} failed: {}", destination, e);
            self.subscriptions.remove(&id);
            return Err(e);
        }
        sub.confirm();
        info!(subscription = %id, "subscribed to {}", destination);
        Ok(sub)
    }

    /// Unsubscribe and wait for the broker's receipt.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), StompError> {
        let _claim = self.connection.claim().await;
        self.subscriptions.destroy(subscription.id()).await
    }

    /// Unsubscribe from everything. Every subscription is removed locally
    /// even if the broker stops answering; the first error is returned.
    pub async fn unsubscribe_all(&self) -> Result<(), StompError> {
        let _claim = self.connection.claim().await;
        let mut first_error = None;
        for sub in self.subscriptions.list() {
            if let Err(e) = self.subscriptions.destroy(sub.id()).await {
                warn!(subscription = sub.id(), "unsubscribe failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_mode_round_trip() {
        for mode in [AckMode::Auto, AckMode::Client, AckMode::ClientIndividual] {
            assert_eq!(mode.as_str().parse::<AckMode>().unwrap(), mode);
        }
        assert!("sometimes".parse::<AckMode>().is_err());
    }
}
