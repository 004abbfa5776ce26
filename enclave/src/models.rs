// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Data models for the parent ↔ enclave exchange.
//!
//! The request mirrors what the host router forwards verbatim from the
//! caller; the response is the only thing the enclave ever says back. The
//! attested truth is `raw_body` plus the attestation document — response
//! `headers` are a caller convenience and are not covered by the nonce.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One fetch request as framed over vsock.
///
/// `headers` is an insertion-ordered map: its serialisation feeds the
/// request hash, so the caller's key order is part of the observable
/// contract and must survive every hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveRequest {
    /// Caller-chosen correlation id, echoed into log lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl EnclaveRequest {
    /// Correlation id for log lines; requests without one log as "-".
    pub fn log_id(&self) -> &str {
        self.id.as_deref().unwrap_or("-")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveResponse {
    pub success: bool,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub raw_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationDocument>,
}

impl EnclaveResponse {
    /// A failure envelope: never carries an attestation.
    pub fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            headers: BTreeMap::new(),
            raw_body: String::new(),
            error: Some(error.into()),
            attestation: None,
        }
    }

    pub fn attested(
        status: u16,
        headers: BTreeMap<String, String>,
        raw_body: String,
        attestation: AttestationDocument,
    ) -> Self {
        Self {
            success: true,
            status,
            headers,
            raw_body,
            error: None,
            attestation: Some(attestation),
        }
    }
}

/// The signed statement tying a response to this exact enclave image.
///
/// `nsm_document` (base64 COSE_Sign1) is the authoritative artefact;
/// `pcrs` are a convenience lift and may be empty when the COSE payload
/// could not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationDocument {
    pub attestation_id: String,
    /// SHA-256 of `raw_body`, hex.
    pub response_hash: String,
    /// SHA-256 of `url ∥ "|" ∥ method ∥ "|" ∥ json(headers)`, hex.
    pub request_hash: String,
    /// `hostname ∥ path`, query string and scheme omitted.
    pub api_endpoint: String,
    pub api_method: String,
    /// Seconds since the UNIX epoch, UTC.
    pub timestamp: u64,
    /// Base64-encoded COSE_Sign1 from the NSM.
    pub nsm_document: String,
    pub pcrs: PcrSet,
    /// SHA-256 of `response_hash ∥ api_endpoint ∥ decimal(timestamp)`, hex.
    pub nonce: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PcrSet {
    pub pcr0: String,
    pub pcr1: String,
    pub pcr2: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_envelope_has_no_attestation() {
        let resp = EnclaveResponse::failure(403, "Host not allowed: api.stripe.com");
        assert!(!resp.success);
        assert_eq!(resp.status, 403);
        assert!(resp.attestation.is_none());
        assert_eq!(
            resp.error.as_deref(),
            Some("Host not allowed: api.stripe.com")
        );

        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("attestation").is_none());
    }

    #[test]
    fn request_headers_preserve_caller_order() {
        let raw = r#"{"url":"https://ec.europa.eu/x","method":"GET",
                      "headers":{"zebra":"1","alpha":"2","mid":"3"}}"#;
        let req: EnclaveRequest = serde_json::from_str(raw).unwrap();
        let keys: Vec<&str> = req.headers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zebra", "alpha", "mid"]);

        // And the order survives re-serialisation (the hash input).
        let out = serde_json::to_string(&req.headers).unwrap();
        assert_eq!(out, r#"{"zebra":"1","alpha":"2","mid":"3"}"#);
    }

    #[test]
    fn request_tolerates_missing_optionals() {
        let req: EnclaveRequest =
            serde_json::from_str(r#"{"url":"https://www.sicae.pt/Consulta.aspx","method":"GET"}"#)
                .unwrap();
        assert!(req.id.is_none());
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
        assert_eq!(req.log_id(), "-");
    }
}
