// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Hostname → enclave routing.
//!
//! The table is assembled once at startup from the per-service CID
//! options and never mutated: every hostname in every enclave's allowlist
//! maps to exactly one service CID. Forwarding dials a fresh vsock
//! connection per request — enclaves serve one framed exchange per
//! connection, so there is nothing to pool.

use vsock::{VsockAddr, VsockStream};

use crate::configuration::RouterOptions;
use crate::constants::ENCLAVE_PORT;
use crate::errors::AppError;
use crate::models::RouteInfo;
use crate::protocol::{recv_message, send_message};

pub struct RouteTable {
    routes: Vec<RouteInfo>,
}

impl RouteTable {
    pub fn from_options(options: &RouterOptions) -> Self {
        let routes = vec![
            RouteInfo {
                service: "vies".to_string(),
                cid: options.vies_cid,
                port: ENCLAVE_PORT,
                hostnames: vec![
                    "ec.europa.eu".to_string(),
                    "api.service.hmrc.gov.uk".to_string(),
                ],
            },
            RouteInfo {
                service: "sicae".to_string(),
                cid: options.sicae_cid,
                port: ENCLAVE_PORT,
                hostnames: vec!["www.sicae.pt".to_string()],
            },
            RouteInfo {
                service: "stripe".to_string(),
                cid: options.stripe_cid,
                port: ENCLAVE_PORT,
                hostnames: vec!["api.stripe.com".to_string()],
            },
        ];
        Self { routes }
    }

    /// Exact, case-sensitive hostname lookup — the same rule the enclave
    /// applies at its allowlist gate.
    pub fn lookup(&self, hostname: &str) -> Option<&RouteInfo> {
        self.routes
            .iter()
            .find(|route| route.hostnames.iter().any(|h| h == hostname))
    }

    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }
}

/// One framed request/reply exchange with an enclave. Blocking; callers
/// run this on the blocking pool.
#[tracing::instrument(skip(payload))]
pub fn forward(cid: u32, port: u32, payload: String) -> Result<Vec<u8>, AppError> {
    let mut stream = VsockStream::connect(&VsockAddr::new(cid, port))
        .map_err(|err| AppError::EnclaveTransport(format!("connect to cid {cid}: {err}")))?;

    tracing::debug!("[router] connected to CID {} port {}", cid, port);

    send_message(&mut stream, &payload)
        .map_err(|err| AppError::EnclaveTransport(format!("send to cid {cid}: {err}")))?;

    let reply = recv_message(&mut stream)
        .map_err(|err| AppError::EnclaveTransport(format!("receive from cid {cid}: {err}")))?;

    tracing::debug!("[router] received {} reply bytes from CID {}", reply.len(), cid);

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::from_options(&RouterOptions::default())
    }

    #[test]
    fn every_allowlisted_host_has_a_route() {
        let table = table();
        for host in [
            "ec.europa.eu",
            "api.service.hmrc.gov.uk",
            "www.sicae.pt",
            "api.stripe.com",
        ] {
            assert!(table.lookup(host).is_some(), "no route for {host}");
        }
    }

    #[test]
    fn both_vat_hosts_share_the_vies_cid() {
        let table = table();
        let a = table.lookup("ec.europa.eu").unwrap();
        let b = table.lookup("api.service.hmrc.gov.uk").unwrap();
        assert_eq!(a.service, "vies");
        assert_eq!(a.cid, b.cid);
    }

    #[test]
    fn lookup_is_exact_and_case_sensitive() {
        let table = table();
        assert!(table.lookup("stripe.com").is_none());
        assert!(table.lookup("API.STRIPE.COM").is_none());
        assert!(table.lookup("api.stripe.com.evil.example").is_none());
    }

    #[test]
    fn cids_follow_the_options() {
        let options = RouterOptions {
            stripe_cid: 99,
            ..RouterOptions::default()
        };
        let table = RouteTable::from_options(&options);
        assert_eq!(table.lookup("api.stripe.com").unwrap().cid, 99);
        assert_eq!(table.lookup("api.stripe.com").unwrap().port, 5000);
    }
}
