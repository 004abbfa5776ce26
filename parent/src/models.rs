// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Data models for the router API and the `nitro-cli` surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

/// Inbound body of `POST /attest/fetch`.
///
/// `url` and `method` are modelled as options so their absence surfaces as
/// a clean 400 instead of a serde rejection; `headers` keeps the caller's
/// key order, which feeds the enclave's request hash downstream.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FetchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 8192))]
    pub url: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// The frame forwarded to an enclave, `url`/`method` now guaranteed.
#[derive(Debug, Clone, Serialize)]
pub struct EnclaveFetchRequest {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// One routing-table entry as reported by `GET /routes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteInfo {
    pub service: String,
    pub cid: u32,
    pub port: u32,
    pub hostnames: Vec<String>,
}

/// The subset of `nitro-cli describe-enclaves` output the health probe
/// needs. Unknown fields in the CLI output are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveDescribeInfo {
    #[serde(rename = "EnclaveName", skip_serializing_if = "Option::is_none")]
    pub enclave_name: Option<String>,
    #[serde(rename = "EnclaveID")]
    pub enclave_id: String,
    #[serde(rename = "EnclaveCID")]
    pub enclave_cid: u64,
    #[serde(rename = "State")]
    pub state: String,
}

/// Per-service health as reported by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveHealth {
    pub service: String,
    pub cid: u32,
    pub state: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub enclaves: Vec<EnclaveHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_request_tolerates_missing_fields() {
        let request: FetchRequest = serde_json::from_str("{}").unwrap();
        assert!(request.url.is_none());
        assert!(request.method.is_none());
        assert!(request.headers.is_empty());
    }

    #[test]
    fn fetch_request_headers_keep_caller_order() {
        let raw = r#"{"url":"https://ec.europa.eu/x","method":"GET",
                      "headers":{"x-b":"1","x-a":"2"}}"#;
        let request: FetchRequest = serde_json::from_str(raw).unwrap();
        let keys: Vec<&str> = request.headers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["x-b", "x-a"]);
    }

    #[test]
    fn validation_rejects_oversized_method() {
        let request = FetchRequest {
            id: None,
            url: Some("https://ec.europa.eu/x".into()),
            method: Some("X".repeat(64)),
            headers: Map::new(),
            body: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn describe_output_parses_with_extra_fields() {
        let raw = r#"[{
            "EnclaveName": "vies-enclave",
            "EnclaveID": "i-0abc-enc-18ff",
            "ProcessID": 4242,
            "EnclaveCID": 16,
            "NumberOfCPUs": 2,
            "CPUIDs": [1, 3],
            "MemoryMiB": 512,
            "State": "RUNNING",
            "Flags": "NONE"
        }]"#;
        let parsed: Vec<EnclaveDescribeInfo> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].enclave_cid, 16);
        assert_eq!(parsed[0].state, "RUNNING");
    }
}
