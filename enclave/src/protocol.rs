// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! vsock message protocol for parent-enclave communication.
//!
//! Each message is a 4-byte unsigned big-endian length header followed by
//! that many bytes of UTF-8 JSON:
//!
//! ```text
//! +-------------------+-------------------+
//! | Length (4 bytes)  | Payload (N bytes) |
//! | big-endian u32    | JSON data         |
//! +-------------------+-------------------+
//! ```
//!
//! Messages larger than [`MAX_MESSAGE_SIZE`] (16 MiB) are rejected on both
//! the read and the write side; zero-length messages are rejected outright.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::constants::MAX_MESSAGE_SIZE;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("message of {0} bytes exceeds maximum of {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),
    #[error("zero-length message")]
    EmptyMessage,
    #[error("stream ended after {got} of {expected} payload bytes")]
    Truncated { expected: usize, got: usize },
    #[error("framing I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends one framed message. The header and payload are fully written or
/// the call fails; no partial frame ever reaches the stream on a size
/// violation because the length check runs first.
pub fn send_message<W: Write>(stream: &mut W, msg: &str) -> Result<(), FrameError> {
    let payload = msg.as_bytes();
    if payload.is_empty() {
        return Err(FrameError::EmptyMessage);
    }
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLarge(payload.len()));
    }

    let mut header = [0u8; 4];
    BigEndian::write_u32(&mut header, payload.len() as u32);
    stream.write_all(&header)?;
    stream.write_all(payload)?;
    stream.flush()?;

    Ok(())
}

/// Receives one framed message, reading exactly the advertised number of
/// payload bytes. Peer EOF mid-payload is a [`FrameError::Truncated`].
pub fn recv_message<R: Read>(stream: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;

    let size = BigEndian::read_u32(&header) as usize;
    if size == 0 {
        return Err(FrameError::EmptyMessage);
    }
    if size > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLarge(size));
    }

    let mut payload = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = stream.read(&mut payload[filled..])?;
        if n == 0 {
            return Err(FrameError::Truncated {
                expected: size,
                got: filled,
            });
        }
        filled += n;
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn roundtrip() {
        let msg = r#"{"id":"req-1","url":"https://ec.europa.eu/x"}"#;
        let mut buf = Vec::new();
        send_message(&mut buf, msg).unwrap();
        assert_eq!(buf.len(), 4 + msg.len());
        assert_eq!(&buf[..4], &(msg.len() as u32).to_be_bytes());

        let out = recv_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(out, msg.as_bytes());
    }

    #[test]
    fn roundtrip_multibyte_utf8() {
        let msg = r#"{"name":"Größe Ströme — ltd."}"#;
        let mut buf = Vec::new();
        send_message(&mut buf, msg).unwrap();
        let out = recv_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), msg);
    }

    #[test]
    fn write_rejects_empty() {
        let mut buf = Vec::new();
        assert!(matches!(
            send_message(&mut buf, ""),
            Err(FrameError::EmptyMessage)
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn write_rejects_oversize_before_any_byte_leaves() {
        // 17 MiB of JSON must fail on the writing side.
        let msg = format!("\"{}\"", "a".repeat(17 * 1024 * 1024));
        let mut buf = Vec::new();
        assert!(matches!(
            send_message(&mut buf, &msg),
            Err(FrameError::MessageTooLarge(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn read_rejects_oversize_header() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes());
        frame.extend_from_slice(b"ignored");
        assert!(matches!(
            recv_message(&mut Cursor::new(frame)),
            Err(FrameError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn read_rejects_zero_header() {
        let frame = 0u32.to_be_bytes().to_vec();
        assert!(matches!(
            recv_message(&mut Cursor::new(frame)),
            Err(FrameError::EmptyMessage)
        ));
    }

    #[test]
    fn read_detects_truncation() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&10u32.to_be_bytes());
        frame.extend_from_slice(b"only5");
        match recv_message(&mut Cursor::new(frame)) {
            Err(FrameError::Truncated { expected, got }) => {
                assert_eq!(expected, 10);
                assert_eq!(got, 5);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn max_size_is_16_mib() {
        assert_eq!(MAX_MESSAGE_SIZE, 16 * 1024 * 1024);
    }
}
