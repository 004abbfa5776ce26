// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! VAT-check attested-fetch enclave.

use enclave_fetch::server;
use enclave_fetch::services::vies;

// Avoid musl's default allocator due to terrible performance
#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    println!("[vies] init");

    if let Err(err) = server::serve(&vies::CONFIG) {
        eprintln!("[vies fatal] {err:?}");
        std::process::exit(1);
    }
}
