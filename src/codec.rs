use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StompError;
use crate::frame::{Command, Frame, headers};
use crate::parser::{Parsed, leading_heartbeats, parse_frame};

/// End-of-line sequence used when encoding. Decoding accepts both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

/// Escape a header key or value for wire transmission.
///
/// Backslash is always escaped first so the sequences introduced afterwards
/// are not escaped twice. CR, LF and colon are escaped for every command
/// except CONNECT/CONNECTED, which keep the STOMP 1.0 encoding.
pub fn escape_header(input: &str, legacy: bool) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' if !legacy => result.push_str("\\r"),
            '\n' if !legacy => result.push_str("\\n"),
            ':' if !legacy => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// Encodes and decodes STOMP frames held in memory.
///
/// `decode` works on a finite buffer: running out of bytes inside a frame is
/// an error rather than a request for more input. The socket side uses
/// [`StompCodec`], which shares the same parser but waits for more bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    line_ending: LineEnding,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_ending(line_ending: LineEnding) -> Self {
        Self { line_ending }
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Encode a frame given as raw parts.
    ///
    /// Parameters
    /// - `command`: wire spelling of the verb; anything outside the STOMP
    ///   command set fails with `InvalidCommand`.
    /// - `headers`: ordered key/value pairs. A caller-supplied
    ///   `content-length` is dropped; the codec computes its own.
    /// - `body`: optional body bytes. A non-empty body gets a
    ///   `content-length` header inserted before all other headers.
    pub fn encode<K, V>(
        &self,
        command: &str,
        headers: &[(K, V)],
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>, StompError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let command: Command = command.parse()?;
        let mut dst = BytesMut::new();
        self.write_parts(
            command,
            headers.iter().map(|(k, v)| (k.as_ref(), v.as_ref())),
            body.unwrap_or_default(),
            &mut dst,
        );
        Ok(dst.to_vec())
    }

    /// Encode a typed frame. The command is valid by construction, so this
    /// cannot fail.
    pub fn encode_frame(&self, frame: &Frame) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.write_frame(frame, &mut dst);
        dst.to_vec()
    }

    pub(crate) fn write_frame(&self, frame: &Frame, dst: &mut BytesMut) {
        self.write_parts(
            frame.command,
            frame.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            &frame.body,
            dst,
        );
    }

    fn write_parts<'a>(
        &self,
        command: Command,
        headers: impl Iterator<Item = (&'a str, &'a str)>,
        body: &[u8],
        dst: &mut BytesMut,
    ) {
        let eol = self.line_ending.as_bytes();
        let legacy = command.uses_legacy_escaping();

        dst.extend_from_slice(command.as_str().as_bytes());
        dst.extend_from_slice(eol);

        if !body.is_empty() {
            dst.extend_from_slice(headers::CONTENT_LENGTH.as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(body.len().to_string().as_bytes());
            dst.extend_from_slice(eol);
        }

        for (k, v) in headers {
            if k.eq_ignore_ascii_case(headers::CONTENT_LENGTH) {
                continue;
            }
            dst.extend_from_slice(escape_header(k, legacy).as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(escape_header(v, legacy).as_bytes());
            dst.extend_from_slice(eol);
        }

        dst.extend_from_slice(eol);
        dst.extend_from_slice(body);
        dst.put_u8(0);
    }

    /// Decode the next frame from a finite buffer.
    ///
    /// Leading heartbeats are consumed and discarded. Returns `Ok(None)` when
    /// the buffer is exhausted before a frame starts. On success the frame's
    /// bytes are removed from `buf`; on error `buf` is left as it was after
    /// the heartbeats.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, StompError> {
        let heartbeats = leading_heartbeats(buf);
        buf.advance(heartbeats);
        if buf.is_empty() {
            return Ok(None);
        }
        match parse_frame(buf)? {
            Parsed::Complete(frame, consumed) => {
                buf.advance(consumed);
                Ok(Some(frame))
            }
            Parsed::Incomplete => Err(StompError::MalformedFrame(
                "unexpected end of byte-stream".to_string(),
            )),
        }
    }

    /// Lazily decode every frame in `buf` until it is exhausted.
    pub fn consume_buffer(&self, buf: BytesMut) -> Frames {
        Frames {
            codec: *self,
            buf,
            done: false,
        }
    }
}

/// Iterator returned by [`Codec::consume_buffer`].
///
/// Yields frames in buffer order. After the buffer is exhausted or a decode
/// error has been yielded, it returns `None` forever.
#[derive(Debug)]
pub struct Frames {
    codec: Codec,
    buf: BytesMut,
    done: bool,
}

impl Iterator for Frames {
    type Item = Result<Frame, StompError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.codec.decode(&mut self.buf) {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Frames {}

/// Items produced or consumed by the streaming codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single end-of-line received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into `StompItem::Frame` or `StompItem::Heartbeat`,
///   waiting for more input when a frame is incomplete.
/// - Encode `StompItem` back into bytes using the configured line ending.
#[derive(Debug, Clone, Copy, Default)]
pub struct StompCodec {
    codec: Codec,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_ending(line_ending: LineEnding) -> Self {
        Self {
            codec: Codec::with_line_ending(line_ending),
        }
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = StompError;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns
    /// - `Ok(Some(StompItem))` when a full item was decoded and its bytes were
    ///   consumed from `src`.
    /// - `Ok(None)` when more bytes are required; `src` is left untouched.
    /// - `Err(StompError)` when the bytes can never form a valid frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.chunk() {
            [b'\n', ..] => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r', b'\n', ..] => {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            [] | [b'\r'] => return Ok(None),
            _ => {}
        }

        match parse_frame(src)? {
            Parsed::Complete(frame, consumed) => {
                src.advance(consumed);
                Ok(Some(StompItem::Frame(frame)))
            }
            Parsed::Incomplete => Ok(None),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(item) => Ok(Some(item)),
            None if buf.iter().all(|&b| b == b'\r') => {
                buf.clear();
                Ok(None)
            }
            None => Err(StompError::MalformedFrame(
                "unexpected end of byte-stream".to_string(),
            )),
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = StompError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StompItem::Heartbeat => dst.put_u8(b'\n'),
            StompItem::Frame(frame) => self.codec.write_frame(&frame, dst),
        }
        Ok(())
    }
}
