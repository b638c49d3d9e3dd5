use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::codec::{StompCodec, StompItem};
use crate::config::{Destinations, Settings, negotiate_heartbeats, parse_heartbeat_header};
use crate::error::{ServerError, StompError};
use crate::event::{Dispatch, FrameEvent, FrameObserver};
use crate::frame::{ACCEPT_VERSIONS, Command, Frame, headers};
use crate::receipt::ReceiptWaiter;
use crate::session::Session;

/// An item queued for the writer side of the background task, with an
/// optional channel to report the outcome of the write.
struct Outbound {
    item: StompItem,
    done: Option<oneshot::Sender<Result<(), StompError>>>,
}

/// State shared between the `Connection` handles and the background task.
struct Shared {
    observers: RwLock<Vec<Arc<dyn FrameObserver>>>,
    /// First error that stopped the task; re-raised to every later caller
    latent: Mutex<Option<StompError>>,
    cancel: CancellationToken,
    /// Negotiated (outgoing, incoming) heartbeat intervals
    heartbeats: Mutex<(Option<Duration>, Option<Duration>)>,
}

impl Shared {
    fn observers(&self) -> Vec<Arc<dyn FrameObserver>> {
        self.observers.read().clone()
    }

    fn record_error(&self, err: StompError) {
        let mut latent = self.latent.lock();
        if latent.is_none() {
            *latent = Some(err);
        }
    }

    fn latent_error(&self) -> StompError {
        self.latent
            .lock()
            .clone()
            .unwrap_or_else(|| StompError::ConnectionClosed("connection stopped".to_string()))
    }
}

struct Inner {
    settings: Settings,
    shared: Arc<Shared>,
    receipts: Arc<ReceiptWaiter>,
    outbound: mpsc::Sender<Outbound>,
    /// Frames no observer claimed. Behind an async mutex so any clone of the
    /// connection can consume.
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    /// Exclusive claim held around subscribe/unsubscribe
    claim: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// A single TCP/STOMP connection.
///
/// `connect` opens the socket and spawns a background task that owns it.
/// The task writes frames queued by `send_frame`, emits heartbeats, decodes
/// inbound bytes and hands each frame to the registered observers; frames no
/// observer discards land on a generic queue read by `recv_frame`.
///
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Non-owning reference to a `Connection`, held by subscriptions and
/// messages so they do not keep the connection alive.
#[derive(Clone, Default)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl std::fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakConnection")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.settings.address())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Connect to the broker described by `settings` and complete the STOMP
    /// handshake.
    ///
    /// Sends CONNECT with `accept-version`, `host`, `login`, `passcode` and,
    /// when either interval is non-zero, `heart-beat`. The first frame back
    /// must be CONNECTED and arrive within `settings.handshake_timeout`.
    ///
    /// Errors
    /// - `Protocol` if the broker answers with ERROR (bad credentials etc).
    /// - `UnexpectedFrame` if it answers with anything but CONNECTED.
    /// - `Timeout` if nothing arrives in time.
    /// - `Io` if the socket cannot be opened.
    ///
    /// The connection is shut down on every error path.
    pub async fn connect(settings: Settings) -> Result<(Connection, Session), StompError> {
        let stream = TcpStream::connect(settings.address()).await?;
        let _ = stream.set_nodelay(true);
        let conn = Connection::start(stream, settings);

        match conn.handshake().await {
            Ok(session) => Ok((conn, session)),
            Err(e) => {
                conn.shutdown().await;
                Err(e)
            }
        }
    }

    fn start(stream: TcpStream, settings: Settings) -> Connection {
        let (read_half, write_half) = stream.into_split();
        let codec = StompCodec::with_line_ending(settings.line_ending);
        let reader = FramedRead::new(read_half, codec);
        let writer = FramedWrite::new(write_half, codec);

        let (out_tx, out_rx) = mpsc::channel::<Outbound>(32);
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        let receipts = Arc::new(ReceiptWaiter::new());
        let shared = Arc::new(Shared {
            observers: RwLock::new(vec![receipts.clone() as Arc<dyn FrameObserver>]),
            latent: Mutex::new(None),
            cancel: CancellationToken::new(),
            heartbeats: Mutex::new((None, None)),
        });

        let task = BackgroundTask {
            reader,
            writer,
            outbound: out_rx,
            inbound: in_tx,
            shared: shared.clone(),
            client_heartbeat: (settings.send_heartbeat_ms, settings.recv_heartbeat_ms),
            tick_interval: settings.tick_interval,
        };
        let handle = tokio::spawn(task.run());

        Connection {
            inner: Arc::new(Inner {
                settings,
                shared,
                receipts,
                outbound: out_tx,
                inbound: tokio::sync::Mutex::new(in_rx),
                claim: tokio::sync::Mutex::new(()),
                task: Mutex::new(Some(handle)),
            }),
        }
    }

    async fn handshake(&self) -> Result<Session, StompError> {
        let settings = &self.inner.settings;
        let mut connect = Frame::new(Command::Connect)
            .header(headers::ACCEPT_VERSION, ACCEPT_VERSIONS)
            .header(headers::HOST, settings.vhost.as_str())
            .header(headers::LOGIN, settings.login.as_str())
            .header(headers::PASSCODE, settings.passcode.as_str());
        if let Some(hb) = settings.heartbeat_header() {
            connect = connect.header(headers::HEART_BEAT, hb);
        }
        self.send_frame(connect).await?;

        let frame = match self.recv_frame(settings.handshake_timeout).await {
            Ok(frame) => frame,
            Err(StompError::Timeout(_)) => {
                return Err(StompError::Timeout("CONNECTED frame".to_string()));
            }
            Err(e) => return Err(e),
        };
        if frame.command != Command::Connected {
            return Err(StompError::UnexpectedFrame(format!(
                "expected CONNECTED, got {}",
                frame.command
            )));
        }
        debug!(
            version = frame.get_header(headers::VERSION).unwrap_or("1.0"),
            "connected to {}",
            settings.address()
        );
        Ok(Session::from_frame(self.clone(), &frame))
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Receipt bookkeeping for frames sent on this connection.
    pub fn receipts(&self) -> &ReceiptWaiter {
        &self.inner.receipts
    }

    /// Add an observer. Observers are notified in registration order; the
    /// receipt waiter is always first.
    pub fn register_observer(&self, observer: Arc<dyn FrameObserver>) {
        self.inner.shared.observers.write().push(observer);
    }

    /// Whether the background task has stopped or been asked to stop.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.cancel.is_cancelled()
    }

    /// The error that stopped the background task, if any.
    pub fn error(&self) -> Option<StompError> {
        self.inner.shared.latent.lock().clone()
    }

    /// Heartbeat intervals agreed with the broker as (outgoing, incoming).
    /// Both are `None` before CONNECTED or when disabled.
    pub fn heartbeats(&self) -> (Option<Duration>, Option<Duration>) {
        *self.inner.shared.heartbeats.lock()
    }

    /// Hold the exclusive claim used to serialize subscribe/unsubscribe.
    pub async fn claim(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.claim.lock().await
    }

    /// Join destinations with the configured separator.
    pub fn join_destination(&self, destinations: impl Into<Destinations>) -> String {
        destinations
            .into()
            .as_slice()
            .join(&self.inner.settings.dest_separator)
    }

    /// Split a `destination` header value with the configured separator.
    pub fn split_destinations(&self, destination: &str) -> Vec<String> {
        split_destinations(destination, &self.inner.settings.dest_separator)
    }

    /// Send a frame.
    ///
    /// Observers see the frame before it is written. When the frame carries a
    /// `receipt` header this waits for the matching RECEIPT, re-sending the
    /// frame after each `receipt_timeout` up to `max_retries` times.
    ///
    /// Errors
    /// - `ReceiptTimeout` when retries are exhausted.
    /// - The latent error when the connection stops while sending or
    ///   waiting (for example `Protocol` after an ERROR frame).
    pub async fn send_frame(&self, frame: Frame) -> Result<(), StompError> {
        for observer in self.inner.shared.observers() {
            observer.notify(FrameEvent::Sent, &frame);
        }
        debug!(command = %frame.command, "sending frame");

        let Some(receipt_id) = frame.get_header(headers::RECEIPT).map(str::to_string) else {
            return self.write(StompItem::Frame(frame)).await;
        };

        let receipts = &self.inner.receipts;
        let handle = receipts.register(&receipt_id);
        let settings = &self.inner.settings;
        let mut retries = 0u32;
        loop {
            if let Err(e) = self.write(StompItem::Frame(frame.clone())).await {
                receipts.forget(&receipt_id);
                return Err(e);
            }

            let confirmed = tokio::select! {
                ok = handle.wait(settings.receipt_timeout) => ok,
                _ = self.inner.shared.cancel.cancelled() => {
                    if handle.is_confirmed() {
                        return Ok(());
                    }
                    receipts.forget(&receipt_id);
                    return Err(self.inner.shared.latent_error());
                }
            };
            if confirmed {
                return Ok(());
            }

            if retries >= settings.max_retries {
                receipts.forget(&receipt_id);
                warn!(receipt_id = %receipt_id, "no receipt after {} attempts", retries + 1);
                return Err(StompError::ReceiptTimeout(receipt_id));
            }
            retries += 1;
            debug!(receipt_id = %receipt_id, retry = retries, "receipt not confirmed, re-sending");
        }
    }

    async fn write(&self, item: StompItem) -> Result<(), StompError> {
        if self.is_closed() {
            return Err(self.inner.shared.latent_error());
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .outbound
            .send(Outbound {
                item,
                done: Some(tx),
            })
            .await
            .map_err(|_| self.inner.shared.latent_error())?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.inner.shared.latent_error()),
        }
    }

    /// Take the next frame from the generic inbound queue.
    ///
    /// Frames already queued are returned even after the connection stopped;
    /// once the queue is empty the latent error is returned. Fails with
    /// `Timeout` if nothing arrives within `timeout`.
    pub async fn recv_frame(&self, timeout: Duration) -> Result<Frame, StompError> {
        let shared = &self.inner.shared;
        let wait = async {
            let mut rx = self.inner.inbound.lock().await;
            if let Ok(frame) = rx.try_recv() {
                return Ok(frame);
            }
            tokio::select! {
                biased;
                frame = rx.recv() => frame.ok_or_else(|| shared.latent_error()),
                _ = shared.cancel.cancelled() => match rx.try_recv() {
                    Ok(frame) => Ok(frame),
                    Err(_) => Err(shared.latent_error()),
                },
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(StompError::Timeout("inbound frame".to_string())),
        }
    }

    /// Non-blocking variant of `recv_frame`. Returns `Ok(None)` when nothing
    /// is queued and the connection is still running.
    pub fn try_recv_frame(&self) -> Result<Option<Frame>, StompError> {
        let Ok(mut rx) = self.inner.inbound.try_lock() else {
            // another task is inside recv_frame
            return if self.is_closed() {
                Err(self.inner.shared.latent_error())
            } else {
                Ok(None)
            };
        };
        match rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::error::TryRecvError::Empty) if !self.is_closed() => Ok(None),
            Err(_) => Err(self.inner.shared.latent_error()),
        }
    }

    /// Start a transaction.
    pub async fn begin(&self, transaction: &str) -> Result<(), StompError> {
        self.send_frame(Frame::new(Command::Begin).header(headers::TRANSACTION, transaction))
            .await
    }

    pub async fn commit(&self, transaction: &str) -> Result<(), StompError> {
        self.send_frame(Frame::new(Command::Commit).header(headers::TRANSACTION, transaction))
            .await
    }

    pub async fn abort(&self, transaction: &str) -> Result<(), StompError> {
        self.send_frame(Frame::new(Command::Abort).header(headers::TRANSACTION, transaction))
            .await
    }

    /// Send DISCONNECT and stop the background task.
    ///
    /// The socket is closed whether or not DISCONNECT could be written; a
    /// write error is returned after cleanup. Closing a connection that has
    /// already stopped only waits for the task.
    pub async fn close(&self) -> Result<(), StompError> {
        let result = if self.is_closed() {
            Ok(())
        } else {
            self.send_frame(Frame::new(Command::Disconnect)).await
        };
        self.shutdown().await;
        result
    }

    async fn shutdown(&self) {
        self.inner.shared.cancel.cancel();
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Split a destination header on `separator`, dropping empty entries.
pub fn split_destinations(destination: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![destination.to_string()];
    }
    destination
        .split(separator)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// The socket-owning half of a connection.
struct BackgroundTask {
    reader: FramedRead<OwnedReadHalf, StompCodec>,
    writer: FramedWrite<OwnedWriteHalf, StompCodec>,
    outbound: mpsc::Receiver<Outbound>,
    inbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    client_heartbeat: (u64, u64),
    tick_interval: Duration,
}

impl BackgroundTask {
    async fn run(mut self) {
        let mut send_interval: Option<Duration> = None;
        let mut recv_interval: Option<Duration> = None;
        let mut last_read = Instant::now();
        let mut last_write = Instant::now();
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome: Result<(), StompError> = loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => break Ok(()),
                maybe = self.outbound.recv() => {
                    let Some(Outbound { item, done }) = maybe else { break Ok(()) };
                    let result = self.writer.send(item).await;
                    if result.is_ok() {
                        last_write = Instant::now();
                    }
                    let failure = result.as_ref().err().cloned();
                    if let Some(done) = done {
                        let _ = done.send(result);
                    }
                    if let Some(e) = failure {
                        break Err(e);
                    }
                }
                item = self.reader.next() => {
                    last_read = Instant::now();
                    match item {
                        Some(Ok(StompItem::Heartbeat)) => trace!("heartbeat received"),
                        Some(Ok(StompItem::Frame(frame))) => {
                            if frame.command == Command::Connected {
                                let (out, inc) = self.negotiate(&frame);
                                send_interval = out;
                                recv_interval = inc;
                            }
                            if let Err(e) = self.dispatch(frame) {
                                break Err(e);
                            }
                        }
                        Some(Err(e)) => break Err(e),
                        None => break Err(StompError::ConnectionClosed(
                            "connection closed by broker".to_string(),
                        )),
                    }
                }
                _ = ticker.tick() => {
                    if let Some(interval) = send_interval {
                        if last_write.elapsed() >= interval {
                            if let Err(e) = self.writer.send(StompItem::Heartbeat).await {
                                break Err(e);
                            }
                            trace!("heartbeat sent");
                            last_write = Instant::now();
                        }
                    }
                    if let Some(interval) = recv_interval {
                        if last_read.elapsed() > interval * 2 {
                            break Err(StompError::ConnectionClosed(format!(
                                "no data from broker for {:?}",
                                interval * 2
                            )));
                        }
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                debug!("connection task stopping");
                self.shared.record_error(StompError::ConnectionClosed(
                    "connection closed".to_string(),
                ));
            }
            Err(e) => {
                match &e {
                    StompError::Protocol(server) => error!("broker error: {}", server),
                    other => warn!("connection task stopped: {}", other),
                }
                self.shared.record_error(e);
            }
        }
        self.shared.cancel.cancel();

        self.outbound.close();
        while let Ok(Outbound { done, .. }) = self.outbound.try_recv() {
            if let Some(done) = done {
                let _ = done.send(Err(self.shared.latent_error()));
            }
        }
        let _ = self.writer.close().await;
    }

    fn negotiate(&self, connected: &Frame) -> (Option<Duration>, Option<Duration>) {
        let (cx, cy) = self.client_heartbeat;
        let (sx, sy) = connected
            .get_header(headers::HEART_BEAT)
            .map(parse_heartbeat_header)
            .unwrap_or((0, 0));
        let negotiated = negotiate_heartbeats(cx, cy, sx, sy);
        *self.shared.heartbeats.lock() = negotiated;
        debug!(outgoing = ?negotiated.0, incoming = ?negotiated.1, "heartbeats negotiated");
        negotiated
    }

    /// Route one inbound frame. ERROR stops the task.
    fn dispatch(&self, frame: Frame) -> Result<(), StompError> {
        if frame.is_error() {
            return Err(ServerError::from_frame(frame).into());
        }
        debug!(command = %frame.command, "frame received");

        let discarded = self
            .shared
            .observers()
            .iter()
            .any(|o| o.notify(FrameEvent::Received, &frame) == Dispatch::Discard);
        if !discarded {
            // receiver lives as long as the connection handles
            let _ = self.inbound.send(frame);
        }
        Ok(())
    }
}
