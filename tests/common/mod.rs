//! Scripted mock broker used by the integration tests.
//!
//! The broker runs on a plain thread with a std `TcpListener`, accepts one
//! client and runs a script against it. Frames are parsed with the crate's
//! own streaming codec.

#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use stomp_transport::{Codec, Command, Frame, Settings, StompCodec, StompItem};
use tokio_util::codec::Decoder;

/// One accepted client connection, seen from the broker side.
pub struct BrokerConn {
    stream: TcpStream,
    buf: BytesMut,
    codec: StompCodec,
    /// Every byte received from the client
    pub raw: Vec<u8>,
    /// Heartbeats received so far
    pub heartbeats: usize,
}

impl BrokerConn {
    fn new(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            buf: BytesMut::new(),
            codec: StompCodec::new(),
            raw: Vec::new(),
            heartbeats: 0,
        }
    }

    /// Next item from the client, or `None` on EOF or read timeout.
    pub fn read_item(&mut self) -> Option<StompItem> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(item)) => return Some(item),
                Ok(None) => {}
                Err(e) => panic!("client sent a bad frame: {}", e),
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(n) => {
                    self.raw.extend_from_slice(&chunk[..n]);
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return None;
                }
                Err(_) => return None,
            }
        }
    }

    /// Next frame, skipping (and counting) heartbeats.
    pub fn read_frame(&mut self) -> Option<Frame> {
        loop {
            match self.read_item()? {
                StompItem::Heartbeat => self.heartbeats += 1,
                StompItem::Frame(frame) => return Some(frame),
            }
        }
    }

    /// Next frame, which must have the given command.
    pub fn expect(&mut self, command: Command) -> Frame {
        let frame = self
            .read_frame()
            .unwrap_or_else(|| panic!("expected {}, got nothing", command));
        assert_eq!(frame.command, command, "unexpected frame: {}", frame);
        frame
    }

    pub fn send(&mut self, frame: &Frame) {
        let bytes = Codec::new().encode_frame(frame);
        self.send_raw(&bytes);
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        // the client may already be gone in failure scenarios
        let _ = self.stream.write_all(bytes);
        let _ = self.stream.flush();
    }

    /// Answer the client's receipt request, if it made one.
    pub fn receipt_for(&mut self, frame: &Frame) {
        if let Some(id) = frame.get_header("receipt") {
            let receipt = Frame::new(Command::Receipt).header("receipt-id", id);
            self.send(&receipt);
        }
    }

    /// Read CONNECT and answer with a STOMP 1.2 CONNECTED frame carrying the
    /// given extra headers. Returns the CONNECT frame.
    pub fn handshake_with(&mut self, headers: &[(&str, &str)]) -> Frame {
        let connect = self.expect(Command::Connect);
        let mut connected = Frame::new(Command::Connected).header("version", "1.2");
        for (k, v) in headers {
            connected = connected.header(*k, *v);
        }
        self.send(&connected);
        connect
    }

    pub fn handshake(&mut self) -> Frame {
        self.handshake_with(&[])
    }

    /// Collect frames until DISCONNECT or the client goes away.
    pub fn drain_until_disconnect(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.read_frame() {
            let done = frame.command == Command::Disconnect;
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }
}

/// A broker serving one client with a script.
pub struct MockBroker<T> {
    pub port: u16,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> MockBroker<T> {
    pub fn start<F>(script: F) -> Self
    where
        F: FnOnce(&mut BrokerConn) -> T + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut conn = BrokerConn::new(stream);
            script(&mut conn)
        });
        Self { port, handle }
    }

    pub fn settings(&self) -> Settings {
        Settings::new("127.0.0.1", self.port).credentials("guest", "guest")
    }

    /// Wait for the script to finish and return its result.
    pub fn join(self) -> T {
        self.handle.join().expect("broker script panicked")
    }
}

/// Port with nothing listening on it.
pub fn unused_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
