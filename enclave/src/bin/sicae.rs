// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Business-activity-code lookup attested-fetch enclave.

use enclave_fetch::server;
use enclave_fetch::services::sicae;

// Avoid musl's default allocator due to terrible performance
#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    println!("[sicae] init");

    if let Err(err) = server::serve(&sicae::CONFIG) {
        eprintln!("[sicae fatal] {err:?}");
        std::process::exit(1);
    }
}
