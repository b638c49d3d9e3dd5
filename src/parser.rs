// Slice-based STOMP frame parser shared by the buffer codec and the
// streaming codec. It never consumes input itself; callers advance their
// buffer by the reported length.

use crate::error::StompError;
use crate::frame::{Command, Frame};

/// Outcome of parsing one frame from the front of a byte slice.
#[derive(Debug)]
pub(crate) enum Parsed {
    /// A full frame and the number of bytes it occupied (through the NUL).
    Complete(Frame, usize),
    /// The slice ends before the frame does.
    Incomplete,
}

/// Number of heartbeat octets (LF, or CR immediately followed by LF) at the
/// front of `input`.
pub(crate) fn leading_heartbeats(input: &[u8]) -> usize {
    let mut pos = 0usize;
    loop {
        match input.get(pos) {
            Some(b'\n') => pos += 1,
            Some(b'\r') if input.get(pos + 1) == Some(&b'\n') => pos += 2,
            _ => return pos,
        }
    }
}

/// Undo STOMP 1.2 header escaping.
///
/// For CONNECT/CONNECTED (`legacy`) only `\\` is translated and any other
/// backslash sequence is kept verbatim. For every other command an
/// undefined escape sequence is a malformed frame.
pub(crate) fn unescape_header(raw: &[u8], legacy: bool) -> Result<Vec<u8>, StompError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().copied();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') if !legacy => out.push(b'\r'),
            Some(b'n') if !legacy => out.push(b'\n'),
            Some(b'c') if !legacy => out.push(b':'),
            Some(other) if legacy => {
                out.push(b'\\');
                out.push(other);
            }
            None if legacy => out.push(b'\\'),
            Some(other) => {
                return Err(StompError::MalformedFrame(format!(
                    "undefined escape sequence '\\{}' in header",
                    other as char
                )));
            }
            None => {
                return Err(StompError::MalformedFrame(
                    "dangling escape at end of header".to_string(),
                ));
            }
        }
    }
    Ok(out)
}

fn header_text(raw: &[u8], legacy: bool, what: &str) -> Result<String, StompError> {
    let unescaped = unescape_header(raw, legacy)?;
    String::from_utf8(unescaped)
        .map_err(|e| StompError::MalformedFrame(format!("invalid utf8 in header {}: {}", what, e)))
}

fn could_become_command(partial: &[u8]) -> bool {
    Command::ALL
        .iter()
        .any(|c| c.as_str().as_bytes().starts_with(partial))
}

/// Parse a single frame from the front of `input`.
///
/// `input` must start at the command line; heartbeats are the caller's
/// business (see [`leading_heartbeats`]). Returns `Parsed::Incomplete` when
/// more bytes are required and an error when the bytes can never form a
/// valid frame.
pub(crate) fn parse_frame(input: &[u8]) -> Result<Parsed, StompError> {
    let len = input.len();

    // command line: CR octets are tolerated anywhere and dropped
    let cmd_end = input.iter().position(|&b| b == b'\n');
    let line = &input[..cmd_end.unwrap_or(len)];
    let command_bytes: Vec<u8> = line.iter().copied().filter(|&b| b != b'\r').collect();
    let Some(cmd_end) = cmd_end else {
        // Reject garbage early instead of buffering it forever.
        if !could_become_command(&command_bytes) {
            return Err(StompError::InvalidCommand(format!(
                "not a STOMP command: {}",
                String::from_utf8_lossy(&command_bytes)
            )));
        }
        return Ok(Parsed::Incomplete);
    };
    let command = Command::from_bytes(&command_bytes)?;
    let legacy = command.uses_legacy_escaping();
    let mut pos = cmd_end + 1;

    // headers until an empty line
    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let Some(line_end_rel) = input[pos..].iter().position(|&b| b == b'\n') else {
            return Ok(Parsed::Incomplete);
        };
        let mut line = &input[pos..pos + line_end_rel];
        pos += line_end_rel + 1;
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Err(StompError::MalformedFrame(format!(
                "malformed header line: {:?}",
                String::from_utf8_lossy(line)
            )));
        };
        let key = header_text(&line[..colon], legacy, "key")?;
        let value = header_text(&line[colon + 1..], legacy, "value")?;
        headers.push((key, value));
    }

    let mut frame = Frame::new(command);
    frame.headers = headers;

    // body: exactly content-length bytes plus NUL, or up to the first NUL
    match frame.content_length()? {
        Some(content_len) => {
            let Some(end) = pos.checked_add(content_len).filter(|&e| e < usize::MAX) else {
                return Err(StompError::MalformedFrame(format!(
                    "content-length out of range: {}",
                    content_len
                )));
            };
            if end >= len {
                return Ok(Parsed::Incomplete);
            }
            if input[end] != 0 {
                return Err(StompError::MalformedFrame(
                    "frame body too large: missing NUL after content-length body".to_string(),
                ));
            }
            frame.body = input[pos..end].to_vec();
            Ok(Parsed::Complete(frame, end + 1))
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul_rel) => {
                frame.body = input[pos..pos + nul_rel].to_vec();
                Ok(Parsed::Complete(frame, pos + nul_rel + 1))
            }
            None => Ok(Parsed::Incomplete),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(input: &[u8]) -> (Frame, usize) {
        match parse_frame(input).expect("parse error") {
            Parsed::Complete(f, n) => (f, n),
            Parsed::Incomplete => panic!("expected complete frame"),
        }
    }

    #[test]
    fn parses_command_headers_and_body() {
        let raw = b"SEND\ndestination:/queue/a\n\nhello\0trailing";
        let (frame, consumed) = complete(raw);
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.get_header("destination"), Some("/queue/a"));
        assert_eq!(frame.body, b"hello");
        assert_eq!(&raw[consumed..], b"trailing");
    }

    #[test]
    fn crlf_line_endings_are_stripped() {
        let raw = b"MESSAGE\r\nmessage-id:1\r\n\r\nbody\0";
        let (frame, _) = complete(raw);
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get_header("message-id"), Some("1"));
        assert_eq!(frame.body, b"body");
    }

    #[test]
    fn incomplete_until_nul_arrives() {
        assert!(matches!(
            parse_frame(b"SEND\n\nhel").unwrap(),
            Parsed::Incomplete
        ));
        assert!(matches!(
            parse_frame(b"SEND\ncontent-length:5\n\nhello").unwrap(),
            Parsed::Incomplete
        ));
        assert!(matches!(parse_frame(b"MESS").unwrap(), Parsed::Incomplete));
    }

    #[test]
    fn garbage_command_fails_before_newline() {
        assert!(matches!(
            parse_frame(b"XYZ"),
            Err(StompError::InvalidCommand(_))
        ));
    }

    #[test]
    fn body_longer_than_content_length_is_malformed() {
        let res = parse_frame(b"SEND\ncontent-length:2\n\nhello\0");
        assert!(matches!(res, Err(StompError::MalformedFrame(_))));
    }

    #[test]
    fn oversized_content_length_is_malformed() {
        let res = parse_frame(b"MESSAGE\ncontent-length:18446744073709551615\n\nx\0");
        assert!(matches!(res, Err(StompError::MalformedFrame(ref m)) if m.contains("out of range")));
    }

    #[test]
    fn header_without_colon_is_malformed() {
        let res = parse_frame(b"SEND\nnocolon\n\n\0");
        assert!(matches!(res, Err(StompError::MalformedFrame(_))));
    }

    #[test]
    fn legacy_unescape_keeps_unknown_sequences() {
        assert_eq!(unescape_header(br"a\cb\\c", true).unwrap(), br"a\cb\c".to_vec());
        assert_eq!(unescape_header(br"a\cb\\c", false).unwrap(), b"a:b\\c".to_vec());
        assert!(unescape_header(br"bad\x", false).is_err());
    }

    #[test]
    fn counts_heartbeat_prefix() {
        assert_eq!(leading_heartbeats(b"\n\r\n\nSEND"), 4);
        assert_eq!(leading_heartbeats(b"\rSEND"), 0);
        assert_eq!(leading_heartbeats(b""), 0);
    }
}
