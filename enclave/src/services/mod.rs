// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Per-service custom handlers.
//!
//! Each enclave image bakes in exactly one [`ServiceHandler`] variant; the
//! handler identity is therefore part of PCR0 and cannot be swapped at
//! runtime. A custom handler owns its upstream protocol (SOAP, JSON,
//! scraped HTML), projects the interesting fields through the
//! field-element codec, and attests the base64 block — the `x-<service>-*`
//! convenience headers it also returns are *not* attested.

pub mod sicae;
pub mod stripe;
pub mod vies;

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use serde_json::{Map, Value};

use crate::field_element::{self, FieldValue, Schema};
use crate::handler::Transport;
use crate::models::EnclaveResponse;
use crate::{attestor, http};

/// Handler variant selected at image build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHandler {
    Generic,
    Vies,
    Sicae,
    Stripe,
}

/// The upstream call a custom handler actually made, kept for the
/// attestation binding (request hash, endpoint, method).
pub(crate) struct UpstreamCall {
    pub endpoint: String,
    pub method: &'static str,
    pub url: String,
    pub headers: Map<String, Value>,
}

impl UpstreamCall {
    pub fn new(
        transport: Transport,
        hostname: &str,
        path: &str,
        method: &'static str,
        headers: &[(String, String)],
    ) -> Self {
        let mut map = Map::new();
        for (name, value) in headers {
            map.insert(name.clone(), Value::String(value.clone()));
        }
        let scheme = match transport {
            Transport::Tls => "https",
            Transport::Plain => "http",
        };
        // The attested endpoint never carries a query string.
        let bare_path = path.split('?').next().unwrap_or(path);
        Self {
            endpoint: format!("{hostname}{bare_path}"),
            method,
            url: format!("{scheme}://{hostname}{path}"),
            headers: map,
        }
    }
}

/// Encodes the projected record, base64s it into `raw_body`, and attests
/// it against the upstream call. Shared tail of every custom handler.
pub(crate) fn attested_record(
    schema: Schema,
    values: &[FieldValue],
    headers: BTreeMap<String, String>,
    call: &UpstreamCall,
) -> EnclaveResponse {
    let block = match field_element::encode(schema, values) {
        Ok(block) => block,
        Err(err) => {
            return EnclaveResponse::failure(500, format!("field encoding failed: {err}"));
        }
    };
    let raw_body = BASE64_STANDARD.encode(&block);

    match attestor::attest(
        &call.endpoint,
        call.method,
        &raw_body,
        &call.url,
        &call.headers,
    ) {
        Ok(document) => EnclaveResponse::attested(200, headers, raw_body, document),
        Err(err) => EnclaveResponse::failure(500, format!("attestation failed: {err:#}")),
    }
}

/// Maps a fetch error onto the caller-visible failure envelope.
pub(crate) fn fetch_failure(err: http::FetchError) -> EnclaveResponse {
    EnclaveResponse::failure(502, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_call_strips_query_from_endpoint() {
        let call = UpstreamCall::new(
            Transport::Tls,
            "api.stripe.com",
            "/v1/charges?limit=3",
            "GET",
            &[],
        );
        assert_eq!(call.endpoint, "api.stripe.com/v1/charges");
        assert_eq!(call.url, "https://api.stripe.com/v1/charges?limit=3");
    }

    #[test]
    fn plain_transport_attests_an_http_url() {
        let call = UpstreamCall::new(Transport::Plain, "www.sicae.pt", "/Consulta.aspx", "POST", &[]);
        assert_eq!(call.url, "http://www.sicae.pt/Consulta.aspx");
        assert_eq!(call.endpoint, "www.sicae.pt/Consulta.aspx");
    }

    #[test]
    fn upstream_call_headers_keep_order() {
        let headers = vec![
            ("Authorization".to_string(), "Bearer sk".to_string()),
            ("Stripe-Version".to_string(), "2023-10-16".to_string()),
        ];
        let call = UpstreamCall::new(Transport::Tls, "api.stripe.com", "/v1/charges", "GET", &headers);
        let keys: Vec<&str> = call.headers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Authorization", "Stripe-Version"]);
    }
}
