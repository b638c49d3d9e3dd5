use std::fmt;
use std::time::Duration;

use crate::codec::LineEnding;
use crate::message::MessageFactory;

/// One or more broker destinations.
///
/// Operations that address destinations accept either a single address or a
/// list; both convert into `Destinations`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Destinations(pub Vec<String>);

impl Destinations {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for Destinations {
    fn from(s: &str) -> Self {
        Destinations(vec![s.to_string()])
    }
}

impl From<String> for Destinations {
    fn from(s: String) -> Self {
        Destinations(vec![s])
    }
}

impl From<&String> for Destinations {
    fn from(s: &String) -> Self {
        Destinations(vec![s.clone()])
    }
}

impl From<Vec<String>> for Destinations {
    fn from(v: Vec<String>) -> Self {
        Destinations(v)
    }
}

impl From<Vec<&str>> for Destinations {
    fn from(v: Vec<&str>) -> Self {
        Destinations(v.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Destinations {
    fn from(v: &[&str]) -> Self {
        Destinations(v.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Destinations {
    fn from(v: [&str; N]) -> Self {
        Destinations(v.iter().map(|s| s.to_string()).collect())
    }
}

/// Connection parameters. Built once and shared read-only by the connection
/// and everything hanging off it.
///
/// The defaults for separators and prefixes are the Apache Apollo ones.
#[derive(Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Virtual host sent in the CONNECT `host` header
    pub vhost: String,
    pub login: String,
    pub passcode: String,
    /// Interval (ms) at which we offer to send heartbeats; 0 disables
    pub send_heartbeat_ms: u64,
    /// Interval (ms) at which we want to receive heartbeats; 0 disables
    pub recv_heartbeat_ms: u64,
    pub path_separator: String,
    pub dest_separator: String,
    pub queue_prefix: String,
    pub topic_prefix: String,
    pub dsub_prefix: String,
    /// Builds `Message`s from inbound MESSAGE frames. `None` uses
    /// `Message::from_frame`.
    pub message_factory: Option<MessageFactory>,
    pub line_ending: LineEnding,
    /// How long each attempt waits for a RECEIPT
    pub receipt_timeout: Duration,
    /// Re-sends after the first attempt before giving up on a receipt
    pub max_retries: u32,
    /// How long `connect` waits for CONNECTED
    pub handshake_timeout: Duration,
    /// Resolution of the heartbeat timer in the background task
    pub tick_interval: Duration,
    /// Size of the per-subscription duplicate window
    pub seen_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 61613,
            vhost: "/".to_string(),
            login: String::new(),
            passcode: String::new(),
            send_heartbeat_ms: 0,
            recv_heartbeat_ms: 0,
            path_separator: ".".to_string(),
            dest_separator: ",".to_string(),
            queue_prefix: "/queue/".to_string(),
            topic_prefix: "/topic/".to_string(),
            dsub_prefix: "/dsub/".to_string(),
            message_factory: None,
            line_ending: LineEnding::Lf,
            receipt_timeout: Duration::from_millis(1000),
            max_retries: 10,
            handshake_timeout: Duration::from_millis(2500),
            tick_interval: Duration::from_millis(50),
            seen_capacity: 1000,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("login", &self.login)
            .field("passcode", &"***")
            .field("send_heartbeat_ms", &self.send_heartbeat_ms)
            .field("recv_heartbeat_ms", &self.recv_heartbeat_ms)
            .field("path_separator", &self.path_separator)
            .field("dest_separator", &self.dest_separator)
            .field("queue_prefix", &self.queue_prefix)
            .field("topic_prefix", &self.topic_prefix)
            .field("dsub_prefix", &self.dsub_prefix)
            .field("message_factory", &self.message_factory.is_some())
            .field("line_ending", &self.line_ending)
            .field("receipt_timeout", &self.receipt_timeout)
            .field("max_retries", &self.max_retries)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("tick_interval", &self.tick_interval)
            .field("seen_capacity", &self.seen_capacity)
            .finish()
    }
}

impl Settings {
    /// Settings for `host:port` with every other field at its default.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `host:port` as accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = login.into();
        self.passcode = passcode.into();
        self
    }

    /// Heartbeat intervals in milliseconds, as (send, receive).
    pub fn heartbeat(mut self, send_ms: u64, recv_ms: u64) -> Self {
        self.send_heartbeat_ms = send_ms;
        self.recv_heartbeat_ms = recv_ms;
        self
    }

    pub fn path_separator(mut self, sep: impl Into<String>) -> Self {
        self.path_separator = sep.into();
        self
    }

    pub fn dest_separator(mut self, sep: impl Into<String>) -> Self {
        self.dest_separator = sep.into();
        self
    }

    pub fn prefixes(
        mut self,
        queue: impl Into<String>,
        topic: impl Into<String>,
        dsub: impl Into<String>,
    ) -> Self {
        self.queue_prefix = queue.into();
        self.topic_prefix = topic.into();
        self.dsub_prefix = dsub.into();
        self
    }

    pub fn message_factory(mut self, factory: MessageFactory) -> Self {
        self.message_factory = Some(factory);
        self
    }

    pub fn line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn seen_capacity(mut self, capacity: usize) -> Self {
        self.seen_capacity = capacity;
        self
    }

    /// The value of the CONNECT `heart-beat` header, or `None` when both
    /// directions are disabled.
    pub fn heartbeat_header(&self) -> Option<String> {
        if self.send_heartbeat_ms == 0 && self.recv_heartbeat_ms == 0 {
            None
        } else {
            Some(format!("{},{}", self.send_heartbeat_ms, self.recv_heartbeat_ms))
        }
    }

    /// Queue address built from path segments, e.g.
    /// `queue(&["orders", "eu"])` is `/queue/orders.eu` with the defaults.
    pub fn queue(&self, segments: &[&str]) -> String {
        self.prefixed(&self.queue_prefix, segments)
    }

    pub fn topic(&self, segments: &[&str]) -> String {
        self.prefixed(&self.topic_prefix, segments)
    }

    /// Durable subscription address.
    pub fn durable(&self, segments: &[&str]) -> String {
        self.prefixed(&self.dsub_prefix, segments)
    }

    fn prefixed(&self, prefix: &str, segments: &[&str]) -> String {
        format!("{}{}", prefix, segments.join(&self.path_separator))
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `client_out`: how often the client offers to send heartbeats (ms).
/// - `client_in`: how often the client wants to receive heartbeats (ms).
/// - `server_out`: server's advertised outgoing interval (ms).
/// - `server_in`: server's advertised incoming interval (ms).
///
/// Returns `(outgoing, incoming)`. A direction is disabled (`None`) when
/// either side sent 0 for it; otherwise the interval is the maximum of the
/// two values.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let direction = |ours: u64, theirs: u64| {
        if ours == 0 || theirs == 0 {
            None
        } else {
            Some(Duration::from_millis(ours.max(theirs)))
        }
    };
    (
        direction(client_out, server_in),
        direction(client_in, server_out),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apollo_defaults() {
        let s = Settings::default();
        assert_eq!(s.path_separator, ".");
        assert_eq!(s.dest_separator, ",");
        assert_eq!(s.queue_prefix, "/queue/");
        assert_eq!(s.topic_prefix, "/topic/");
        assert_eq!(s.dsub_prefix, "/dsub/");
        assert_eq!(s.send_heartbeat_ms, 0);
        assert_eq!(s.recv_heartbeat_ms, 0);
        assert!(s.message_factory.is_none());
        assert_eq!(s.max_retries, 10);
        assert_eq!(s.receipt_timeout, Duration::from_secs(1));
        assert_eq!(s.seen_capacity, 1000);
        assert!(s.heartbeat_header().is_none());
    }

    #[test]
    fn destination_helpers_join_segments() {
        let s = Settings::default();
        assert_eq!(s.queue(&["orders", "eu"]), "/queue/orders.eu");
        assert_eq!(s.topic(&["prices"]), "/topic/prices");
        let s = s.path_separator("/");
        assert_eq!(s.durable(&["a", "b"]), "/dsub/a/b");
    }

    #[test]
    fn heartbeat_header_when_enabled() {
        let s = Settings::new("broker", 61613).heartbeat(0, 5000);
        assert_eq!(s.heartbeat_header().as_deref(), Some("0,5000"));
        assert_eq!(s.address(), "broker:61613");
    }

    #[test]
    fn debug_hides_passcode() {
        let s = Settings::default().credentials("user", "secret");
        let dbg = format!("{:?}", s);
        assert!(dbg.contains("user"));
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn destinations_from_single_and_list() {
        assert_eq!(Destinations::from("/queue/a").0, vec!["/queue/a"]);
        assert_eq!(
            Destinations::from(["/queue/a", "/queue/b"]).0,
            vec!["/queue/a", "/queue/b"]
        );
        let v: Vec<String> = vec!["/topic/x".into()];
        assert_eq!(Destinations::from(v).as_slice(), ["/topic/x".to_string()]);
    }

    #[test]
    fn heartbeat_parse_is_tolerant() {
        assert_eq!(parse_heartbeat_header("10000,5000"), (10000, 5000));
        assert_eq!(parse_heartbeat_header(" 10 , x"), (10, 0));
        assert_eq!(parse_heartbeat_header(""), (0, 0));
    }

    #[test]
    fn negotiation_takes_max_and_respects_zero() {
        let (out, inc) = negotiate_heartbeats(1000, 2000, 3000, 500);
        assert_eq!(out, Some(Duration::from_millis(1000)));
        assert_eq!(inc, Some(Duration::from_millis(3000)));

        let (out, inc) = negotiate_heartbeats(0, 2000, 0, 500);
        assert_eq!(out, None);
        assert_eq!(inc, None);
    }
}
