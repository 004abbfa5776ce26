// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Stripe payments-listing attested-fetch enclave.

use enclave_fetch::server;
use enclave_fetch::services::stripe;

// Avoid musl's default allocator due to terrible performance
#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    println!("[stripe] init");

    if let Err(err) = server::serve(&stripe::CONFIG) {
        eprintln!("[stripe fatal] {err:?}");
        std::process::exit(1);
    }
}
