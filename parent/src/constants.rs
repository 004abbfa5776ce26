// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Configuration constants for the host-side router.

use std::time::Duration;

/// The vsock port every attested-fetch enclave listens on.
pub const ENCLAVE_PORT: u32 = 5000;

/// Maximum framed message size (16 MiB), matching the enclave side.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum HTTP request body size accepted by `/attest/fetch` (10 MiB).
pub const REQUEST_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Outer HTTP request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for one host → enclave round trip (dial, frame, reply).
pub const ENCLAVE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for one `nitro-cli describe-enclaves` invocation.
pub const HEALTH_CLI_TIMEOUT: Duration = Duration::from_secs(5);
