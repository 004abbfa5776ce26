// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Request handling: allowlist gate, generic attested fetch, and dispatch
//! into the per-service handler baked into this image.

use serde_json::Value;
use url::Url;

use crate::models::{EnclaveRequest, EnclaveResponse};
use crate::services::{self, ServiceHandler};
use crate::{attestor, http};

/// How to reach one allowlisted host through the host-side proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tls,
    Plain,
}

#[derive(Debug, Clone, Copy)]
pub struct AllowlistEntry {
    pub hostname: &'static str,
    pub proxy_port: u32,
    pub transport: Transport,
}

/// Fixed identity of one enclave service. The allowlist and handler
/// variant are compile-time data: they are part of the image measurement.
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub name: &'static str,
    pub allowlist: &'static [AllowlistEntry],
    pub handler: ServiceHandler,
}

impl ServiceConfig {
    pub fn entry(&self, hostname: &str) -> Option<&'static AllowlistEntry> {
        self.allowlist.iter().find(|e| e.hostname == hostname)
    }
}

/// Handles one framed request end-to-end, always producing an envelope.
///
/// The hostname gate runs before any dispatch: a request whose URL points
/// outside the allowlist is refused even when a custom handler would never
/// have contacted that host.
pub fn handle_request(config: &ServiceConfig, request: &EnclaveRequest) -> EnclaveResponse {
    let url = match Url::parse(&request.url) {
        Ok(url) => url,
        Err(err) => {
            return EnclaveResponse::failure(400, format!("invalid url: {err}"));
        }
    };
    let hostname = match url.host_str() {
        Some(host) => host.to_string(),
        None => return EnclaveResponse::failure(400, "url has no hostname"),
    };

    let Some(entry) = config.entry(&hostname) else {
        return EnclaveResponse::failure(403, format!("Host not allowed: {hostname}"));
    };

    match config.handler {
        ServiceHandler::Generic => generic_fetch(entry, request, &url),
        ServiceHandler::Vies => services::vies::handle(config, request),
        ServiceHandler::Sicae => services::sicae::handle(config, request),
        ServiceHandler::Stripe => services::stripe::handle(config, request),
    }
}

/// The generic pipeline: forward the caller's request as-is, then attest
/// whatever the upstream answered — any status code is an observation
/// worth signing.
fn generic_fetch(
    entry: &AllowlistEntry,
    request: &EnclaveRequest,
    url: &Url,
) -> EnclaveResponse {
    let path = compose_path(url);
    let headers = flatten_headers(request);

    let result = match entry.transport {
        Transport::Tls => http::proxy_fetch(
            entry.hostname,
            entry.proxy_port,
            &request.method,
            &path,
            &headers,
            request.body.as_deref(),
        ),
        Transport::Plain => http::proxy_fetch_plain(
            entry.hostname,
            entry.proxy_port,
            &request.method,
            &path,
            &headers,
            request.body.as_deref(),
        ),
    };

    let upstream = match result {
        Ok(response) => response,
        Err(err) => return EnclaveResponse::failure(502, err.to_string()),
    };

    let api_endpoint = format!("{}{}", entry.hostname, url.path());
    match attestor::attest(
        &api_endpoint,
        &request.method,
        &upstream.body,
        &request.url,
        &request.headers,
    ) {
        Ok(document) => {
            EnclaveResponse::attested(upstream.status, upstream.headers, upstream.body, document)
        }
        Err(err) => EnclaveResponse::failure(500, format!("attestation failed: {err:#}")),
    }
}

/// `pathname ∥ '?' ∥ query`, with the query part omitted when empty.
pub(crate) fn compose_path(url: &Url) -> String {
    match url.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", url.path(), query),
        _ => url.path().to_string(),
    }
}

fn flatten_headers(request: &EnclaveRequest) -> Vec<(String, String)> {
    request
        .headers
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}
