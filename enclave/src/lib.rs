// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

pub mod attestor;
pub mod constants;
pub mod field_element;
pub mod handler;
pub mod http;
pub mod models;
pub mod nsm;
pub mod protocol;
pub mod server;
pub mod services;
pub mod transport;
