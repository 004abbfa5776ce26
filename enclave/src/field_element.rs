// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Deterministic projection of typed records into fixed-layout field
//! elements.
//!
//! Each schema field occupies exactly 32 bytes at offset `32 * index`, and
//! every slot is the big-endian representation of a value strictly below
//! the BN254 scalar modulus, so downstream circuits can consume the block
//! directly. Absent, null and empty-string inputs all collapse to the
//! all-zero slot; in particular `uint(0)` and "absent" are byte-identical.
//! That collision is intentional and documented: boolean fields use 1/0
//! with the caveat that 0 and missing cannot be told apart.

use sha2::{Digest, Sha256};

pub const SLOT_SIZE: usize = 32;

/// BN254 scalar field modulus, big-endian:
/// 21888242871839275222246405745257275088548364400416034343698204186575808495617.
pub const FIELD_MODULUS: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58,
    0x5d, 0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00,
    0x00, 0x01,
];

/// Longest string a `shortString` slot can carry: 31 bytes keeps the value
/// below 2^248 and therefore below the modulus.
pub const MAX_SHORT_STRING: usize = 31;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("string for field {field:?} is {len} bytes, limit {MAX_SHORT_STRING}")]
    StringTooLong { field: &'static str, len: usize },
    #[error("uint slot is not below the field modulus")]
    UIntOutOfRange,
    #[error("field {field:?} expects {expected} but got an incompatible value")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },
    #[error("schema has {schema} fields but {values} values were supplied")]
    ArityMismatch { schema: usize, values: usize },
    #[error("slot does not decode as UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    ShortString,
    Sha256,
    UInt,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaField {
    pub name: &'static str,
    pub encoding: FieldEncoding,
}

pub type Schema = &'static [SchemaField];

/// One input value for a schema field. `Absent` covers null, missing and
/// empty-string inputs uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    UInt(u64),
    Absent,
}

impl FieldValue {
    pub fn from_bool(b: bool) -> Self {
        FieldValue::UInt(u64::from(b))
    }

    /// Strings normalise the empty case to `Absent` so the zero sentinel
    /// applies without special-casing at call sites.
    pub fn from_str_opt(s: Option<&str>) -> Self {
        match s {
            None => FieldValue::Absent,
            Some(s) if s.is_empty() => FieldValue::Absent,
            Some(s) => FieldValue::Str(s.to_string()),
        }
    }
}

/// Total byte length of a block produced from `schema`.
pub fn byte_length(schema: Schema) -> usize {
    SLOT_SIZE * schema.len()
}

/// Encodes `values` against `schema`, concatenating the per-field slots in
/// schema order.
pub fn encode(schema: Schema, values: &[FieldValue]) -> Result<Vec<u8>, CodecError> {
    if schema.len() != values.len() {
        return Err(CodecError::ArityMismatch {
            schema: schema.len(),
            values: values.len(),
        });
    }

    let mut block = Vec::with_capacity(byte_length(schema));
    for (field, value) in schema.iter().zip(values) {
        block.extend_from_slice(&encode_slot(field, value)?);
    }
    Ok(block)
}

fn encode_slot(field: &SchemaField, value: &FieldValue) -> Result<[u8; SLOT_SIZE], CodecError> {
    let mut slot = [0u8; SLOT_SIZE];

    match (field.encoding, value) {
        (_, FieldValue::Absent) => {}
        (FieldEncoding::ShortString, FieldValue::Str(s)) => {
            let bytes = s.as_bytes();
            if bytes.len() > MAX_SHORT_STRING {
                return Err(CodecError::StringTooLong {
                    field: field.name,
                    len: bytes.len(),
                });
            }
            slot[SLOT_SIZE - bytes.len()..].copy_from_slice(bytes);
        }
        (FieldEncoding::Sha256, FieldValue::Str(s)) => {
            let digest: [u8; 32] = Sha256::digest(s.as_bytes()).into();
            slot = reduce_mod_p(digest);
        }
        (FieldEncoding::UInt, FieldValue::UInt(v)) => {
            slot[SLOT_SIZE - 8..].copy_from_slice(&v.to_be_bytes());
        }
        (FieldEncoding::ShortString, _) | (FieldEncoding::Sha256, _) => {
            return Err(CodecError::TypeMismatch {
                field: field.name,
                expected: "a string",
            });
        }
        (FieldEncoding::UInt, _) => {
            return Err(CodecError::TypeMismatch {
                field: field.name,
                expected: "an unsigned integer",
            });
        }
    }

    Ok(slot)
}

/// Reduces a 256-bit big-endian value modulo the field. 2^256 is less than
/// six times the modulus, so a conditional-subtract loop terminates in at
/// most six steps.
fn reduce_mod_p(mut value: [u8; 32]) -> [u8; 32] {
    while value >= FIELD_MODULUS {
        let mut borrow = 0u16;
        for i in (0..SLOT_SIZE).rev() {
            let lhs = u16::from(value[i]);
            let rhs = u16::from(FIELD_MODULUS[i]) + borrow;
            if lhs >= rhs {
                value[i] = (lhs - rhs) as u8;
                borrow = 0;
            } else {
                value[i] = (lhs + 0x100 - rhs) as u8;
                borrow = 1;
            }
        }
    }
    value
}

/// True iff the slot is a canonical field element (strictly below p).
pub fn slot_in_field(slot: &[u8; SLOT_SIZE]) -> bool {
    *slot < FIELD_MODULUS
}

// --- Decoder-side mirrors -------------------------------------------------
//
// The verifier that consumes attested blocks does not live in the enclave,
// but the rules must round-trip; these helpers carry the test surface.

/// Decodes a `shortString` slot. The all-zero slot decodes to `None`.
pub fn decode_short_string(slot: &[u8; SLOT_SIZE]) -> Result<Option<String>, CodecError> {
    let start = slot.iter().position(|&b| b != 0);
    match start {
        None => Ok(None),
        Some(start) => String::from_utf8(slot[start..].to_vec())
            .map(Some)
            .map_err(|_| CodecError::InvalidUtf8),
    }
}

/// Decodes a `uint` slot. Slots at or above the modulus, or wider than 64
/// bits, are out of range.
pub fn decode_uint(slot: &[u8; SLOT_SIZE]) -> Result<u64, CodecError> {
    if !slot_in_field(slot) || slot[..SLOT_SIZE - 8].iter().any(|&b| b != 0) {
        return Err(CodecError::UIntOutOfRange);
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&slot[SLOT_SIZE - 8..]);
    Ok(u64::from_be_bytes(raw))
}

/// True iff `slot` is the `sha256` encoding of `value`.
pub fn verify_sha256(value: &str, slot: &[u8; SLOT_SIZE]) -> bool {
    let digest: [u8; 32] = Sha256::digest(value.as_bytes()).into();
    reduce_mod_p(digest) == *slot
}
