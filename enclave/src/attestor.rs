// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Builds attestation documents for observed responses.
//!
//! The nonce handed to the NSM is a deterministic digest binding the
//! attestation to one specific response body, endpoint and timestamp; it
//! is not an anti-replay nonce. Within one invocation the ordering is
//! fixed: response observed → hashes computed → NSM consulted.

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use data_encoding::HEXLOWER;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::AttestationDocument;
use crate::nsm;

/// Attests `raw_body` as observed from `api_endpoint`.
///
/// `request_url` and `request_headers` describe the upstream request that
/// produced the body; for custom handlers that is the call the handler
/// actually made, not the caller's envelope.
pub fn attest(
    api_endpoint: &str,
    api_method: &str,
    raw_body: &str,
    request_url: &str,
    request_headers: &Map<String, Value>,
) -> Result<AttestationDocument> {
    let timestamp = unix_timestamp()?;
    let attestation_id = format!("enc-{}", Uuid::new_v4());

    let response_hash = sha256_hex(raw_body.as_bytes());
    let request_hash = request_hash(request_url, api_method, request_headers)?;
    let nonce = nonce_hex(&response_hash, api_endpoint, timestamp);

    let document = nsm::attestation_document(nonce.as_bytes())
        .context("NSM attestation request failed")?;
    let pcrs = nsm::extract_pcrs(&document);

    Ok(AttestationDocument {
        attestation_id,
        response_hash,
        request_hash,
        api_endpoint: api_endpoint.to_string(),
        api_method: api_method.to_string(),
        timestamp,
        nsm_document: BASE64_STANDARD.encode(&document),
        pcrs,
        nonce,
    })
}

fn unix_timestamp() -> Result<u64> {
    use std::time::{SystemTime, UNIX_EPOCH};
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the epoch")?
        .as_secs())
}

pub fn sha256_hex(data: &[u8]) -> String {
    HEXLOWER.encode(&Sha256::digest(data))
}

/// `SHA-256(url ∥ "|" ∥ method ∥ "|" ∥ json(headers))`, hex. The header
/// map serialises in insertion order with no whitespace; that exact string
/// is the verifier's contract.
pub fn request_hash(url: &str, method: &str, headers: &Map<String, Value>) -> Result<String> {
    let headers_json =
        serde_json::to_string(headers).context("failed to serialise request headers")?;
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(method.as_bytes());
    hasher.update(b"|");
    hasher.update(headers_json.as_bytes());
    Ok(HEXLOWER.encode(&hasher.finalize()))
}

/// `SHA-256(response_hash ∥ api_endpoint ∥ decimal(timestamp))`, hex.
pub fn nonce_hex(response_hash: &str, api_endpoint: &str, timestamp: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(response_hash.as_bytes());
    hasher.update(api_endpoint.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_hash_matches_reference_vector() {
        // SHA-256("") and SHA-256("abc") are published test vectors.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn nonce_is_hash_of_concatenation() {
        let response_hash = sha256_hex(b"body");
        let endpoint = "api.service.hmrc.gov.uk/organisations/vat/check-vat-number/lookup/1";
        let nonce = nonce_hex(&response_hash, endpoint, 1_700_000_000);

        let manual = sha256_hex(format!("{response_hash}{endpoint}1700000000").as_bytes());
        assert_eq!(nonce, manual);
        assert_eq!(nonce.len(), 64);
    }

    #[test]
    fn nonce_depends_on_every_input() {
        let rh = sha256_hex(b"body");
        let base = nonce_hex(&rh, "a.example/x", 1);
        assert_ne!(base, nonce_hex(&rh, "a.example/y", 1));
        assert_ne!(base, nonce_hex(&rh, "a.example/x", 2));
        assert_ne!(base, nonce_hex(&sha256_hex(b"other"), "a.example/x", 1));
    }

    #[test]
    fn request_hash_uses_pipe_separators_and_header_order() {
        let mut headers = Map::new();
        headers.insert("b".to_string(), Value::String("2".to_string()));
        headers.insert("a".to_string(), Value::String("1".to_string()));

        let hash = request_hash("https://ec.europa.eu/x?q=1", "POST", &headers).unwrap();
        let manual =
            sha256_hex(br#"https://ec.europa.eu/x?q=1|POST|{"b":"2","a":"1"}"#);
        assert_eq!(hash, manual);

        // Different insertion order, different hash: order is contractual.
        let mut reordered = Map::new();
        reordered.insert("a".to_string(), Value::String("1".to_string()));
        reordered.insert("b".to_string(), Value::String("2".to_string()));
        let other = request_hash("https://ec.europa.eu/x?q=1", "POST", &reordered).unwrap();
        assert_ne!(hash, other);
    }

    #[test]
    fn empty_headers_hash_as_empty_object() {
        let hash = request_hash("https://api.stripe.com/v1/charges", "GET", &Map::new()).unwrap();
        let manual = sha256_hex(b"https://api.stripe.com/v1/charges|GET|{}");
        assert_eq!(hash, manual);
    }
}
