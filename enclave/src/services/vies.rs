// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! VAT-number check service.
//!
//! GB numbers go to the HMRC JSON API; every other country code goes to
//! the EU VIES SOAP endpoint. Either way the result is projected into the
//! five-field schema `[countryCode, vatNumber, valid, name, address]` —
//! 160 bytes, attested as a base64 string.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use serde::Deserialize;

use crate::field_element::{FieldEncoding, FieldValue, Schema, SchemaField};
use crate::handler::{AllowlistEntry, ServiceConfig, Transport};
use crate::http;
use crate::models::{EnclaveRequest, EnclaveResponse};
use crate::services::{ServiceHandler, UpstreamCall, attested_record, fetch_failure};

pub const CONFIG: ServiceConfig = ServiceConfig {
    name: "vies",
    allowlist: &[
        AllowlistEntry {
            hostname: "ec.europa.eu",
            proxy_port: 8443,
            transport: Transport::Tls,
        },
        AllowlistEntry {
            hostname: "api.service.hmrc.gov.uk",
            proxy_port: 8444,
            transport: Transport::Tls,
        },
    ],
    handler: ServiceHandler::Vies,
};

pub const SCHEMA: Schema = &[
    SchemaField {
        name: "countryCode",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "vatNumber",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "valid",
        encoding: FieldEncoding::UInt,
    },
    SchemaField {
        name: "name",
        encoding: FieldEncoding::Sha256,
    },
    SchemaField {
        name: "address",
        encoding: FieldEncoding::Sha256,
    },
];

const VIES_PATH: &str = "/taxation_customs/vies/services/checkVatService";
const HMRC_PATH_PREFIX: &str = "/organisations/vat/check-vat-number/lookup/";

#[derive(Debug, Deserialize)]
struct VatCheckRequest {
    #[serde(rename = "countryCode")]
    country_code: String,
    #[serde(rename = "vatNumber")]
    vat_number: String,
}

#[derive(Debug, Clone, PartialEq)]
struct VatRecord {
    valid: bool,
    name: String,
    address: String,
}

pub fn handle(config: &ServiceConfig, request: &EnclaveRequest) -> EnclaveResponse {
    let parsed: VatCheckRequest = match request
        .body
        .as_deref()
        .ok_or_else(|| "missing request body".to_string())
        .and_then(|body| serde_json::from_str(body).map_err(|e| e.to_string()))
    {
        Ok(parsed) => parsed,
        Err(err) => return EnclaveResponse::failure(400, format!("invalid request: {err}")),
    };

    if let Err(err) = validate(&parsed) {
        return EnclaveResponse::failure(400, err);
    }

    let outcome = if parsed.country_code == "GB" {
        check_gb(config, &parsed.vat_number)
    } else {
        check_eu(config, &parsed.country_code, &parsed.vat_number)
    };
    let (record, call) = match outcome {
        Ok(ok) => ok,
        Err(response) => return response,
    };

    let values = vec![
        FieldValue::Str(parsed.country_code.clone()),
        FieldValue::Str(parsed.vat_number.clone()),
        FieldValue::from_bool(record.valid),
        FieldValue::from_str_opt(Some(&record.name)),
        FieldValue::from_str_opt(Some(&record.address)),
    ];

    let mut headers = BTreeMap::new();
    headers.insert("x-vies-country-code".into(), parsed.country_code);
    headers.insert("x-vies-vat-number".into(), parsed.vat_number);
    headers.insert("x-vies-valid".into(), record.valid.to_string());
    headers.insert("x-vies-name".into(), record.name);
    headers.insert("x-vies-address".into(), record.address);

    attested_record(SCHEMA, &values, headers, &call)
}

fn validate(request: &VatCheckRequest) -> Result<(), String> {
    if request.country_code.len() != 2
        || !request
            .country_code
            .chars()
            .all(|c| c.is_ascii_uppercase())
    {
        return Err("countryCode must be two uppercase letters".into());
    }
    if request.vat_number.is_empty() || request.vat_number.len() > 20 {
        return Err("vatNumber must be 1-20 characters".into());
    }
    if !request
        .vat_number
        .chars()
        .all(|c| c.is_ascii_alphanumeric())
    {
        return Err("vatNumber must be alphanumeric".into());
    }
    Ok(())
}

fn check_gb(
    config: &ServiceConfig,
    vat_number: &str,
) -> Result<(VatRecord, UpstreamCall), EnclaveResponse> {
    let Some(entry) = config.entry("api.service.hmrc.gov.uk") else {
        return Err(EnclaveResponse::failure(500, "HMRC host not configured"));
    };

    let encoded = utf8_percent_encode(vat_number, NON_ALPHANUMERIC).to_string();
    let path = format!("{HMRC_PATH_PREFIX}{encoded}");
    let headers = vec![(
        "Accept".to_string(),
        "application/vnd.hmrc.1.0+json".to_string(),
    )];

    let response = http::proxy_fetch(
        entry.hostname,
        entry.proxy_port,
        "GET",
        &path,
        &headers,
        None,
    )
    .map_err(fetch_failure)?;

    let call = UpstreamCall::new(entry.transport, entry.hostname, &path, "GET", &headers);
    let record = parse_hmrc_response(response.status, &response.body)
        .map_err(|err| EnclaveResponse::failure(502, err))?;
    Ok((record, call))
}

/// HMRC semantics: 404 means "no such VAT number" (a negative but valid
/// observation), 200 carries the registration, anything else is an
/// upstream error.
fn parse_hmrc_response(status: u16, body: &str) -> Result<VatRecord, String> {
    match status {
        404 => Ok(VatRecord {
            valid: false,
            name: String::new(),
            address: String::new(),
        }),
        200 => {
            let json: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| format!("invalid HMRC response JSON: {e}"))?;
            let target = json
                .get("target")
                .ok_or_else(|| "HMRC response has no target".to_string())?;
            let name = target
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let address = target
                .get("address")
                .map(|addr| {
                    ["line1", "line2", "postcode"]
                        .iter()
                        .filter_map(|key| addr.get(key).and_then(|v| v.as_str()))
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            Ok(VatRecord {
                valid: true,
                name,
                address,
            })
        }
        other => Err(format!("HMRC lookup failed with upstream status {other}")),
    }
}

fn check_eu(
    config: &ServiceConfig,
    country_code: &str,
    vat_number: &str,
) -> Result<(VatRecord, UpstreamCall), EnclaveResponse> {
    let Some(entry) = config.entry("ec.europa.eu") else {
        return Err(EnclaveResponse::failure(500, "VIES host not configured"));
    };

    let envelope = soap_envelope(country_code, vat_number);
    let headers = vec![
        (
            "Content-Type".to_string(),
            "text/xml;charset=UTF-8".to_string(),
        ),
        ("SOAPAction".to_string(), "\"\"".to_string()),
    ];

    let response = http::proxy_fetch(
        entry.hostname,
        entry.proxy_port,
        "POST",
        VIES_PATH,
        &headers,
        Some(&envelope),
    )
    .map_err(fetch_failure)?;

    let call = UpstreamCall::new(entry.transport, entry.hostname, VIES_PATH, "POST", &headers);
    let record = parse_soap_response(response.status, &response.body)
        .map_err(|err| EnclaveResponse::failure(502, err))?;
    Ok((record, call))
}

fn soap_envelope(country_code: &str, vat_number: &str) -> String {
    format!(
        concat!(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:urn="urn:ec.europa.eu:taxud:vies:services:checkVat:types">"#,
            "<soapenv:Header/><soapenv:Body><urn:checkVat>",
            "<urn:countryCode>{}</urn:countryCode>",
            "<urn:vatNumber>{}</urn:vatNumber>",
            "</urn:checkVat></soapenv:Body></soapenv:Envelope>"
        ),
        xml_escape(country_code),
        xml_escape(vat_number),
    )
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn fault_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<(?:\w+:)?faultstring[^>]*>(.*?)</(?:\w+:)?faultstring>")
            .expect("fault regex")
    })
}

fn tag_re(tag: &'static str, cache: &'static OnceLock<Regex>) -> &'static Regex {
    cache.get_or_init(|| {
        Regex::new(&format!(r"(?s)<(?:\w+:)?{tag}>(.*?)</(?:\w+:)?{tag}>")).expect("tag regex")
    })
}

/// Parses the `checkVat` SOAP response. A `Fault` element or a non-200
/// status is an upstream failure; otherwise the three interesting elements
/// are extracted tolerating any namespace prefix.
fn parse_soap_response(status: u16, body: &str) -> Result<VatRecord, String> {
    let fault = fault_re()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| xml_unescape(m.as_str().trim()));
    let has_fault = fault.is_some()
        || Regex::new(r"<(?:\w+:)?Fault[\s>]")
            .expect("fault-presence regex")
            .is_match(body);

    if has_fault || status != 200 {
        return Err(match fault {
            Some(faultstring) if !faultstring.is_empty() => {
                format!("VIES fault: {faultstring}")
            }
            _ => format!("VIES lookup failed with upstream status {status}"),
        });
    }

    static VALID_RE: OnceLock<Regex> = OnceLock::new();
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();

    let valid = tag_re("valid", &VALID_RE)
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim() == "true")
        .ok_or_else(|| "VIES response has no <valid> element".to_string())?;

    let extract = |re: &Regex| {
        re.captures(body)
            .and_then(|c| c.get(1))
            .map(|m| xml_unescape(m.as_str().trim()))
            .unwrap_or_default()
    };
    let name = extract(tag_re("name", &NAME_RE));
    let address = extract(tag_re("address", &ADDRESS_RE));

    Ok(VatRecord {
        valid,
        name,
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_element::{self, byte_length};

    const VALID_SOAP: &str = concat!(
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
        "<soap:Body><ns2:checkVatResponse ",
        r#"xmlns:ns2="urn:ec.europa.eu:taxud:vies:services:checkVat:types">"#,
        "<ns2:countryCode>PT</ns2:countryCode>",
        "<ns2:vatNumber>507172230</ns2:vatNumber>",
        "<ns2:valid>true</ns2:valid>",
        "<ns2:name>TYTLE LDA</ns2:name>",
        "<ns2:address>RUA DO EXEMPLO 123</ns2:address>",
        "</ns2:checkVatResponse></soap:Body></soap:Envelope>"
    );

    #[test]
    fn soap_envelope_escapes_injected_markup() {
        let envelope = soap_envelope("PT", "1<evil>&x");
        assert!(envelope.contains("<urn:vatNumber>1&lt;evil&gt;&amp;x</urn:vatNumber>"));
        assert!(!envelope.contains("<evil>"));
    }

    #[test]
    fn parses_valid_vat_response() {
        let record = parse_soap_response(200, VALID_SOAP).unwrap();
        assert!(record.valid);
        assert_eq!(record.name, "TYTLE LDA");
        assert_eq!(record.address, "RUA DO EXEMPLO 123");
    }

    #[test]
    fn parses_invalid_vat_response_with_empty_fields() {
        let body = VALID_SOAP
            .replace("true", "false")
            .replace("TYTLE LDA", "")
            .replace("RUA DO EXEMPLO 123", "");
        let record = parse_soap_response(200, &body).unwrap();
        assert!(!record.valid);
        assert!(record.name.is_empty());
        assert!(record.address.is_empty());
    }

    #[test]
    fn fault_is_reported_with_faultstring() {
        let body = concat!(
            "<soap:Envelope><soap:Body><soap:Fault>",
            "<faultcode>soap:Server</faultcode>",
            "<faultstring>MS_MAX_CONCURRENT_REQ</faultstring>",
            "</soap:Fault></soap:Body></soap:Envelope>"
        );
        let err = parse_soap_response(200, body).unwrap_err();
        assert!(err.contains("MS_MAX_CONCURRENT_REQ"));
    }

    #[test]
    fn non_200_without_fault_reports_status() {
        let err = parse_soap_response(500, "<html>gateway error</html>").unwrap_err();
        assert!(err.contains("500"));
    }

    #[test]
    fn valid_record_projects_to_160_bytes() {
        let record = parse_soap_response(200, VALID_SOAP).unwrap();
        let values = vec![
            FieldValue::Str("PT".into()),
            FieldValue::Str("507172230".into()),
            FieldValue::from_bool(record.valid),
            FieldValue::from_str_opt(Some(&record.name)),
            FieldValue::from_str_opt(Some(&record.address)),
        ];
        let block = field_element::encode(SCHEMA, &values).unwrap();
        assert_eq!(block.len(), byte_length(SCHEMA));
        assert_eq!(block.len(), 160);

        // valid slot is uint 1
        assert_eq!(block[64..95], [0u8; 31]);
        assert_eq!(block[95], 1);
        let name_slot: [u8; 32] = block[96..128].try_into().unwrap();
        assert!(field_element::verify_sha256("TYTLE LDA", &name_slot));
        let addr_slot: [u8; 32] = block[128..160].try_into().unwrap();
        assert!(field_element::verify_sha256("RUA DO EXEMPLO 123", &addr_slot));
    }

    #[test]
    fn invalid_record_has_zero_tail() {
        let values = vec![
            FieldValue::Str("PT".into()),
            FieldValue::Str("507172230".into()),
            FieldValue::from_bool(false),
            FieldValue::from_str_opt(Some("")),
            FieldValue::from_str_opt(Some("")),
        ];
        let block = field_element::encode(SCHEMA, &values).unwrap();
        assert!(block[64..160].iter().all(|&b| b == 0));
    }

    #[test]
    fn hmrc_404_is_a_negative_observation_not_an_error() {
        let record = parse_hmrc_response(404, r#"{"code":"NOT_FOUND"}"#).unwrap();
        assert!(!record.valid);
        assert!(record.name.is_empty());
    }

    #[test]
    fn hmrc_200_joins_address_parts_dropping_empties() {
        let body = r#"{"target":{"name":"ACME LTD","address":{
            "line1":"1 High Street","line2":"","postcode":"AB1 2CD"}}}"#;
        let record = parse_hmrc_response(200, body).unwrap();
        assert!(record.valid);
        assert_eq!(record.name, "ACME LTD");
        assert_eq!(record.address, "1 High Street, AB1 2CD");
    }

    #[test]
    fn hmrc_unexpected_status_is_an_upstream_error() {
        let err = parse_hmrc_response(503, "").unwrap_err();
        assert!(err.contains("503"));
    }

    #[test]
    fn request_validation_rejects_bad_inputs() {
        let bad = |cc: &str, vat: &str| {
            validate(&VatCheckRequest {
                country_code: cc.into(),
                vat_number: vat.into(),
            })
            .is_err()
        };
        assert!(bad("P", "507172230"));
        assert!(bad("pt", "507172230"));
        assert!(bad("PT", ""));
        assert!(bad("PT", "507 172 230"));
        assert!(!bad("PT", "507172230"));
        assert!(!bad("GB", "GD001"));
    }
}
