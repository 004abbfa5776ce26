// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use clap::{ArgAction, Parser};

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct RouterOptions {
    #[arg(long, default_value = "127.0.0.1", env("ROUTER_HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "5001", env("PORT"))]
    pub port: u16,
    #[arg(long, default_value = "16", env("VIES_CID"))]
    pub vies_cid: u32,
    #[arg(long, default_value = "17", env("SICAE_CID"))]
    pub sicae_cid: u32,
    #[arg(long, default_value = "18", env("STRIPE_CID"))]
    pub stripe_cid: u32,
    #[arg(long, default_value = "false", env("SKIP_HEALTH_PROBE"), action = ArgAction::SetTrue)]
    pub skip_health_probe: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        RouterOptions {
            host: "127.0.0.1".to_string(),
            port: 5001,
            vies_cid: 16,
            sicae_cid: 17,
            stripe_cid: 18,
            skip_health_probe: false,
        }
    }
}
