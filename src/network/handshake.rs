//! Connection handshake
//!
//! After accepting a peer the device sends its host identifier as UTF-8
//! terminated by a single `\n`, at most [`HOST_ID_MAX`] bytes including the
//! terminator. The peer answers with exactly one mode byte. In network mode
//! everything after the mode byte is frame data.

use std::io::{BufRead, Read, Write};

use crate::error::HandshakeError;

/// Maximum preamble length in bytes, terminator included
pub const HOST_ID_MAX: usize = 20;

/// Fallback identifier when nothing better is known
pub const DEFAULT_HOST_ID: &str = "mic-array";

/// Session mode chosen by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stream frames back over the connection
    Network,
    /// Record frames to local storage
    Local,
}

impl Mode {
    pub fn from_byte(byte: u8) -> Result<Self, HandshakeError> {
        match byte {
            b'N' => Ok(Mode::Network),
            b'L' => Ok(Mode::Local),
            other => Err(HandshakeError::UnknownMode(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Mode::Network => b'N',
            Mode::Local => b'L',
        }
    }
}

/// Clean a host identifier for the preamble
///
/// Control characters are removed and the result is cut at a character
/// boundary so that it fits with its terminator.
pub fn sanitize_host_id(host_id: &str) -> String {
    let mut out = String::new();
    for ch in host_id.trim().chars().filter(|c| !c.is_control()) {
        if out.len() + ch.len_utf8() > HOST_ID_MAX - 1 {
            break;
        }
        out.push(ch);
    }
    if out.is_empty() {
        out.push_str(DEFAULT_HOST_ID);
    }
    out
}

/// Work out the identifier to announce
///
/// Order: configured value, `$HOSTNAME`, `/etc/hostname`, [`DEFAULT_HOST_ID`].
pub fn resolve_host_id(configured: Option<&str>) -> String {
    let candidate = configured
        .map(str::to_string)
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .unwrap_or_default();
    sanitize_host_id(&candidate)
}

pub fn encode_preamble(host_id: &str) -> Vec<u8> {
    let mut out = sanitize_host_id(host_id).into_bytes();
    out.push(b'\n');
    out
}

pub fn write_preamble<W: Write>(writer: &mut W, host_id: &str) -> Result<(), HandshakeError> {
    writer.write_all(&encode_preamble(host_id))?;
    writer.flush()?;
    Ok(())
}

/// Validate a received preamble line, terminator included
pub fn parse_preamble(line: &str) -> Result<String, HandshakeError> {
    let host_id = line.strip_suffix('\n').ok_or(HandshakeError::InvalidPreamble)?;
    if host_id.is_empty() || line.len() > HOST_ID_MAX || host_id.contains('\n') {
        return Err(HandshakeError::InvalidPreamble);
    }
    Ok(host_id.to_string())
}

/// Read the preamble on the peer side
pub fn read_preamble<R: BufRead>(reader: &mut R) -> Result<String, HandshakeError> {
    let mut line = String::new();
    let read = reader.take(HOST_ID_MAX as u64).read_line(&mut line)?;
    if read == 0 {
        return Err(HandshakeError::Closed);
    }
    parse_preamble(&line)
}

/// Read the single mode byte on the device side
pub fn read_mode<R: Read>(reader: &mut R) -> Result<Mode, HandshakeError> {
    let mut byte = [0u8; 1];
    match reader.read_exact(&mut byte) {
        Ok(()) => Mode::from_byte(byte[0]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(HandshakeError::Closed),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_mode_bytes() {
        assert_eq!(Mode::from_byte(b'N').unwrap(), Mode::Network);
        assert_eq!(Mode::from_byte(b'L').unwrap(), Mode::Local);
        assert!(matches!(Mode::from_byte(b'R'), Err(HandshakeError::UnknownMode(b'R'))));
        assert_eq!(Mode::Network.as_byte(), b'N');
    }

    #[test]
    fn test_preamble_is_truncated_and_terminated() {
        let bytes = encode_preamble("matrix-creator-livingroom-01");
        assert_eq!(bytes.len(), HOST_ID_MAX);
        assert_eq!(*bytes.last().unwrap(), b'\n');
        assert_eq!(&bytes[..19], b"matrix-creator-livi");

        assert_eq!(encode_preamble("pi\n"), b"pi\n".to_vec());
        assert_eq!(encode_preamble(""), b"mic-array\n".to_vec());
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let id = sanitize_host_id("ééééééééééé");
        assert!(id.len() <= HOST_ID_MAX - 1);
        assert_eq!(id.chars().count(), 9);
    }

    #[test]
    fn test_read_preamble_then_frames() {
        let mut wire = encode_preamble("raspberrypi");
        wire.extend_from_slice(&[1, 0, 2, 0]);
        let mut cursor = Cursor::new(wire);

        assert_eq!(read_preamble(&mut cursor).unwrap(), "raspberrypi");
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![1, 0, 2, 0]);
    }

    #[test]
    fn test_read_preamble_rejects_unterminated() {
        let mut cursor = Cursor::new(b"this-host-id-is-way-too-long".to_vec());
        assert!(matches!(read_preamble(&mut cursor), Err(HandshakeError::InvalidPreamble)));

        let mut empty = Cursor::new(Vec::new());
        assert!(matches!(read_preamble(&mut empty), Err(HandshakeError::Closed)));
    }

    #[test]
    fn test_read_mode() {
        assert_eq!(read_mode(&mut Cursor::new(b"N".to_vec())).unwrap(), Mode::Network);
        assert!(matches!(read_mode(&mut Cursor::new(Vec::new())), Err(HandshakeError::Closed)));
    }
}
