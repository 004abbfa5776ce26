// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Compile-time configuration for the enclave side.

use std::time::Duration;

/// Vsock port every attested-fetch enclave listens on.
pub const ENCLAVE_PORT: u32 = 5000;

/// The host (parent instance) is always CID 3 from inside an enclave.
pub const HOST_CID: u32 = 3;

/// Maximum framed message size (16 MiB) on both read and write.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Wall-clock budget for one outbound fetch, TLS handshake included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(25);

/// Backoff after a failed `accept()` before retrying.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
