// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Enclave fleet health probe.
//!
//! Asks `nitro-cli describe-enclaves` which enclaves are actually running
//! and cross-checks the routing table: a route is healthy iff an enclave
//! with its CID is in state `RUNNING`. A CLI failure (missing binary,
//! timeout, bad JSON) degrades every route to `NOT_FOUND` rather than
//! erroring the probe — an unreachable CLI means an unhealthy host.

use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::HEALTH_CLI_TIMEOUT;
use crate::models::{EnclaveDescribeInfo, EnclaveHealth, HealthReport};
use crate::routing::RouteTable;

const RUNNING_STATE: &str = "RUNNING";
const NOT_FOUND_STATE: &str = "NOT_FOUND";

#[tracing::instrument(skip(table))]
pub async fn check(table: &RouteTable) -> HealthReport {
    let enclaves = match describe_enclaves().await {
        Ok(enclaves) => enclaves,
        Err(err) => {
            tracing::warn!("[router] describe-enclaves failed: {err:#}");
            Vec::new()
        }
    };

    report_for(table, &enclaves)
}

async fn describe_enclaves() -> anyhow::Result<Vec<EnclaveDescribeInfo>> {
    let output = timeout(
        HEALTH_CLI_TIMEOUT,
        Command::new("nitro-cli").arg("describe-enclaves").output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("nitro-cli timed out after {HEALTH_CLI_TIMEOUT:?}"))??;

    if !output.status.success() {
        anyhow::bail!(
            "nitro-cli exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

fn report_for(table: &RouteTable, enclaves: &[EnclaveDescribeInfo]) -> HealthReport {
    let statuses: Vec<EnclaveHealth> = table
        .routes()
        .iter()
        .map(|route| {
            let state = enclaves
                .iter()
                .find(|e| e.enclave_cid == u64::from(route.cid))
                .map(|e| e.state.clone())
                .unwrap_or_else(|| NOT_FOUND_STATE.to_string());
            EnclaveHealth {
                service: route.service.clone(),
                cid: route.cid,
                healthy: state == RUNNING_STATE,
                state,
            }
        })
        .collect();

    HealthReport {
        healthy: statuses.iter().all(|s| s.healthy),
        enclaves: statuses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::RouterOptions;

    fn table() -> RouteTable {
        RouteTable::from_options(&RouterOptions::default())
    }

    fn running(cid: u64) -> EnclaveDescribeInfo {
        EnclaveDescribeInfo {
            enclave_name: None,
            enclave_id: format!("i-0abc-enc-{cid}"),
            enclave_cid: cid,
            state: RUNNING_STATE.to_string(),
        }
    }

    #[test]
    fn all_running_means_healthy() {
        let report = report_for(&table(), &[running(16), running(17), running(18)]);
        assert!(report.healthy);
        assert!(report.enclaves.iter().all(|e| e.healthy));
    }

    #[test]
    fn one_missing_enclave_fails_overall_health() {
        let report = report_for(&table(), &[running(16), running(17)]);
        assert!(!report.healthy);
        let stripe = report
            .enclaves
            .iter()
            .find(|e| e.service == "stripe")
            .unwrap();
        assert!(!stripe.healthy);
        assert_eq!(stripe.state, NOT_FOUND_STATE);
    }

    #[test]
    fn non_running_state_is_unhealthy() {
        let mut terminating = running(18);
        terminating.state = "TERMINATING".to_string();
        let report = report_for(&table(), &[running(16), running(17), terminating]);
        assert!(!report.healthy);
    }

    #[test]
    fn empty_cli_output_reports_everything_not_found() {
        let report = report_for(&table(), &[]);
        assert!(!report.healthy);
        assert!(report.enclaves.iter().all(|e| e.state == NOT_FOUND_STATE));
        assert_eq!(report.enclaves.len(), 3);
    }
}
