// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! vsock message protocol, host side.
//!
//! Mirrors the enclave's framing exactly: 4-byte unsigned big-endian
//! length, then that many bytes of UTF-8 JSON, 16 MiB cap both ways.
//! The enclave image carries its own copy of this module; the two must
//! stay in lockstep.

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
