// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Stripe payments listing/lookup service.
//!
//! A closed set of operations maps onto Stripe REST paths; anything else
//! is refused before a byte leaves the enclave. The attested record binds
//! a digest of the full response body rather than the body itself, so the
//! caller can keep the payload private while still proving what was seen.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use url::form_urlencoded;
use zeroize::ZeroizeOnDrop;

use crate::attestor::sha256_hex;
use crate::field_element::{FieldEncoding, FieldValue, Schema, SchemaField};
use crate::handler::{AllowlistEntry, ServiceConfig, Transport};
use crate::http;
use crate::models::{EnclaveRequest, EnclaveResponse};
use crate::services::{ServiceHandler, UpstreamCall, attested_record, fetch_failure};

pub const CONFIG: ServiceConfig = ServiceConfig {
    name: "stripe",
    allowlist: &[AllowlistEntry {
        hostname: "api.stripe.com",
        proxy_port: 8446,
        transport: Transport::Tls,
    }],
    handler: ServiceHandler::Stripe,
};

pub const SCHEMA: Schema = &[
    SchemaField {
        name: "operation",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "accountId",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "objectType",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "dataHash",
        encoding: FieldEncoding::Sha256,
    },
    SchemaField {
        name: "totalCount",
        encoding: FieldEncoding::UInt,
    },
    SchemaField {
        name: "hasMore",
        encoding: FieldEncoding::UInt,
    },
];

const STRIPE_VERSION: &str = "2023-10-16";

#[derive(Deserialize, ZeroizeOnDrop)]
struct StripeRequest {
    operation: String,
    #[serde(rename = "apiKey")]
    api_key: String,
    #[serde(rename = "stripeAccount")]
    stripe_account: Option<String>,
    #[serde(rename = "queryParams")]
    #[zeroize(skip)]
    query_params: Option<BTreeMap<String, String>>,
    #[serde(rename = "resourceId")]
    resource_id: Option<String>,
}

// The API key must never reach a log line.
impl fmt::Debug for StripeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeRequest")
            .field("operation", &self.operation)
            .field("api_key", &"[REDACTED]")
            .field("stripe_account", &self.stripe_account)
            .field("query_params", &self.query_params)
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    ListCharges,
    ListPaymentIntents,
    GetCharge,
    GetPaymentIntent,
}

impl Operation {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "list_charges" => Some(Self::ListCharges),
            "list_payment_intents" => Some(Self::ListPaymentIntents),
            "get_charge" => Some(Self::GetCharge),
            "get_payment_intent" => Some(Self::GetPaymentIntent),
            _ => None,
        }
    }

    fn needs_resource(self) -> bool {
        matches!(self, Self::GetCharge | Self::GetPaymentIntent)
    }

    fn path(self, resource_id: Option<&str>) -> Option<String> {
        match self {
            Self::ListCharges => Some("/v1/charges".to_string()),
            Self::ListPaymentIntents => Some("/v1/payment_intents".to_string()),
            Self::GetCharge => resource_id.map(|id| format!("/v1/charges/{id}")),
            Self::GetPaymentIntent => resource_id.map(|id| format!("/v1/payment_intents/{id}")),
        }
    }

    /// The `object` discriminator Stripe must echo for this operation.
    fn expected_object(self) -> &'static str {
        match self {
            Self::ListCharges | Self::ListPaymentIntents => "list",
            Self::GetCharge => "charge",
            Self::GetPaymentIntent => "payment_intent",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StripeObservation {
    object_type: String,
    data_hash: String,
    total_count: u64,
    has_more: bool,
}

pub fn handle(config: &ServiceConfig, request: &EnclaveRequest) -> EnclaveResponse {
    let parsed: StripeRequest = match request
        .body
        .as_deref()
        .ok_or_else(|| "missing request body".to_string())
        .and_then(|body| serde_json::from_str(body).map_err(|e| e.to_string()))
    {
        Ok(parsed) => parsed,
        Err(err) => return EnclaveResponse::failure(400, format!("invalid request: {err}")),
    };

    let Some(operation) = Operation::from_name(&parsed.operation) else {
        return EnclaveResponse::failure(
            400,
            format!("unknown operation: {:?}", parsed.operation),
        );
    };
    if parsed.api_key.is_empty() {
        return EnclaveResponse::failure(400, "apiKey must not be empty");
    }
    if operation.needs_resource() {
        match parsed.resource_id.as_deref() {
            Some(id) if !id.is_empty() && id.chars().all(valid_resource_char) => {}
            Some(_) => return EnclaveResponse::failure(400, "resourceId is malformed"),
            None => {
                return EnclaveResponse::failure(
                    400,
                    format!("operation {:?} requires resourceId", parsed.operation),
                );
            }
        }
    }

    let Some(entry) = config.entry("api.stripe.com") else {
        return EnclaveResponse::failure(500, "Stripe host not configured");
    };

    let Some(base_path) = operation.path(parsed.resource_id.as_deref()) else {
        return EnclaveResponse::failure(400, "resourceId is required");
    };
    let path = match &parsed.query_params {
        Some(params) if !params.is_empty() => {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (key, value) in params {
                serializer.append_pair(key, value);
            }
            format!("{base_path}?{}", serializer.finish())
        }
        _ => base_path.clone(),
    };

    let mut headers = vec![
        (
            "Authorization".to_string(),
            format!("Bearer {}", parsed.api_key),
        ),
        ("Stripe-Version".to_string(), STRIPE_VERSION.to_string()),
    ];
    if let Some(account) = parsed.stripe_account.as_deref().filter(|a| !a.is_empty()) {
        headers.push(("Stripe-Account".to_string(), account.to_string()));
    }

    let response = match http::proxy_fetch(
        entry.hostname,
        entry.proxy_port,
        "GET",
        &path,
        &headers,
        None,
    ) {
        Ok(response) => response,
        Err(err) => return fetch_failure(err),
    };

    let observation =
        match observe_response(response.status, &response.body, operation.expected_object()) {
            Ok(observation) => observation,
            Err(err) => return EnclaveResponse::failure(502, err),
        };

    let call = UpstreamCall::new(entry.transport, entry.hostname, &path, "GET", &headers);
    let account_id = parsed.stripe_account.clone().unwrap_or_default();

    let values = vec![
        FieldValue::Str(parsed.operation.clone()),
        FieldValue::from_str_opt(Some(&account_id)),
        FieldValue::Str(observation.object_type.clone()),
        FieldValue::Str(observation.data_hash.clone()),
        FieldValue::UInt(observation.total_count),
        FieldValue::from_bool(observation.has_more),
    ];

    let mut out_headers = BTreeMap::new();
    out_headers.insert("x-stripe-operation".into(), parsed.operation.clone());
    out_headers.insert("x-stripe-account".into(), account_id);
    out_headers.insert("x-stripe-object-type".into(), observation.object_type);
    out_headers.insert("x-stripe-data-hash".into(), observation.data_hash);
    out_headers.insert(
        "x-stripe-total-count".into(),
        observation.total_count.to_string(),
    );
    out_headers.insert(
        "x-stripe-has-more".into(),
        u64::from(observation.has_more).to_string(),
    );

    attested_record(SCHEMA, &values, out_headers, &call)
}

fn valid_resource_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Gate + projection: Stripe must answer 200 with the expected `object`
/// discriminator; the observation digests the exact body bytes.
fn observe_response(
    status: u16,
    body: &str,
    expected_object: &str,
) -> Result<StripeObservation, String> {
    if status != 200 {
        return Err(format!("Stripe request failed with upstream status {status}"));
    }

    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("invalid Stripe response JSON: {e}"))?;
    let object = json
        .get("object")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Stripe response has no object field".to_string())?;
    if object != expected_object {
        return Err(format!(
            "Stripe response object {object:?} does not match expected {expected_object:?}"
        ));
    }

    let total_count = match json.get("data").and_then(|v| v.as_array()) {
        Some(data) => data.len() as u64,
        None => 1,
    };
    let has_more = json
        .get("has_more")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(StripeObservation {
        object_type: object.to_string(),
        data_hash: sha256_hex(body.as_bytes()),
        total_count,
        has_more,
    })
}
