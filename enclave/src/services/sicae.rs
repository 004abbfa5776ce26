// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Portuguese business-activity-code (CAE) lookup.
//!
//! The upstream is a classic ASP.NET WebForms page over plain HTTP: a GET
//! collects `__VIEWSTATE`/`__EVENTVALIDATION` and the session cookie, a
//! url-encoded POST submits the NIF. The form control names have changed
//! across site revisions, so a small candidate list is tried, ordered by
//! which names actually appear in the landing page. The result HTML is
//! parsed in two passes: a structured table walk first, then a bare
//! any-5-digit-codes sweep.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use url::form_urlencoded;

use crate::field_element::{FieldEncoding, FieldValue, Schema, SchemaField};
use crate::handler::{AllowlistEntry, ServiceConfig, Transport};
use crate::http::{self, HttpResponse};
use crate::models::{EnclaveRequest, EnclaveResponse};
use crate::services::{ServiceHandler, UpstreamCall, attested_record, fetch_failure};

pub const CONFIG: ServiceConfig = ServiceConfig {
    name: "sicae",
    allowlist: &[AllowlistEntry {
        hostname: "www.sicae.pt",
        proxy_port: 8445,
        transport: Transport::Plain,
    }],
    handler: ServiceHandler::Sicae,
};

pub const SCHEMA: Schema = &[
    SchemaField {
        name: "nif",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "name",
        encoding: FieldEncoding::Sha256,
    },
    SchemaField {
        name: "cae1Code",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "cae1Desc",
        encoding: FieldEncoding::Sha256,
    },
    SchemaField {
        name: "cae2Code",
        encoding: FieldEncoding::ShortString,
    },
    SchemaField {
        name: "cae2Desc",
        encoding: FieldEncoding::Sha256,
    },
];

const CONSULTA_PATH: &str = "/Consulta.aspx";

/// NIF/submit control-name pairs seen across site revisions.
const FIELD_CANDIDATES: &[(&str, &str)] = &[
    (
        "ctl00$ContentPlaceHolder1$txtNif",
        "ctl00$ContentPlaceHolder1$btnPesquisar",
    ),
    ("ctl00$MainContent$txtNif", "ctl00$MainContent$btnPesquisar"),
    ("txtNif", "btnPesquisar"),
];

#[derive(Debug, Deserialize)]
struct SicaeRequest {
    nif: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CompanyRecord {
    official_name: String,
    cae1_code: String,
    cae1_desc: String,
    cae2_code: String,
    cae2_desc: String,
}

pub fn handle(config: &ServiceConfig, request: &EnclaveRequest) -> EnclaveResponse {
    let parsed: SicaeRequest = match request
        .body
        .as_deref()
        .ok_or_else(|| "missing request body".to_string())
        .and_then(|body| serde_json::from_str(body).map_err(|e| e.to_string()))
    {
        Ok(parsed) => parsed,
        Err(err) => return EnclaveResponse::failure(400, format!("invalid request: {err}")),
    };

    if parsed.nif.len() != 9 || !parsed.nif.chars().all(|c| c.is_ascii_digit()) {
        return EnclaveResponse::failure(400, "nif must be exactly 9 digits");
    }

    let Some(entry) = config.entry("www.sicae.pt") else {
        return EnclaveResponse::failure(500, "SICAE host not configured");
    };

    // Step 1: landing page for tokens + session cookie.
    let landing = match http::proxy_fetch_plain(
        entry.hostname,
        entry.proxy_port,
        "GET",
        CONSULTA_PATH,
        &[],
        None,
    ) {
        Ok(response) => response,
        Err(err) => return fetch_failure(err),
    };

    let (viewstate, eventvalidation) = match extract_tokens(&landing.body) {
        Ok(tokens) => tokens,
        Err(err) => return EnclaveResponse::failure(502, err),
    };
    let cookie = session_cookie(&landing);

    // Step 2: submit the form, trying candidate control names in order of
    // appearance in the landing page.
    for (nif_field, submit_field) in ordered_candidates(&landing.body) {
        let form = build_form(&viewstate, &eventvalidation, nif_field, submit_field, &parsed.nif);
        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        if let Some(cookie) = &cookie {
            headers.push(("Cookie".to_string(), cookie.clone()));
        }

        let response = match http::proxy_fetch_plain(
            entry.hostname,
            entry.proxy_port,
            "POST",
            CONSULTA_PATH,
            &headers,
            Some(&form),
        ) {
            Ok(response) => response,
            Err(err) => return fetch_failure(err),
        };

        if let Some(record) = parse_result_html(&response.body, &parsed.nif) {
            let call =
                UpstreamCall::new(entry.transport, entry.hostname, CONSULTA_PATH, "POST", &headers);

            let values = vec![
                FieldValue::Str(parsed.nif.clone()),
                FieldValue::from_str_opt(Some(&record.official_name)),
                FieldValue::from_str_opt(Some(&record.cae1_code)),
                FieldValue::from_str_opt(Some(&record.cae1_desc)),
                FieldValue::from_str_opt(Some(&record.cae2_code)),
                FieldValue::from_str_opt(Some(&record.cae2_desc)),
            ];

            let mut out_headers = BTreeMap::new();
            out_headers.insert("x-sicae-nif".into(), parsed.nif);
            out_headers.insert("x-sicae-name".into(), record.official_name);
            out_headers.insert("x-sicae-cae1-code".into(), record.cae1_code);
            out_headers.insert("x-sicae-cae1-desc".into(), record.cae1_desc);
            out_headers.insert("x-sicae-cae2-code".into(), record.cae2_code);
            out_headers.insert("x-sicae-cae2-desc".into(), record.cae2_desc);

            return attested_record(SCHEMA, &values, out_headers, &call);
        }
    }

    EnclaveResponse::failure(404, format!("no company found for NIF {}", parsed.nif))
}

fn hidden_field_re(name: &str) -> Regex {
    Regex::new(&format!(
        r#"(?:name|id)="{}"[^>]*value="([^"]*)""#,
        regex::escape(name)
    ))
    .expect("hidden field regex")
}

fn extract_tokens(html: &str) -> Result<(String, String), String> {
    let viewstate = hidden_field_re("__VIEWSTATE")
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| "landing page has no __VIEWSTATE token".to_string())?;
    let eventvalidation = hidden_field_re("__EVENTVALIDATION")
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| "landing page has no __EVENTVALIDATION token".to_string())?;
    Ok((viewstate, eventvalidation))
}

fn session_cookie(response: &HttpResponse) -> Option<String> {
    response
        .headers
        .get("set-cookie")
        .map(|raw| raw.split(';').next().unwrap_or(raw).trim().to_string())
        .filter(|cookie| !cookie.is_empty())
}

/// Candidates whose NIF control name appears in the landing HTML come
/// first; the relative order within each group is preserved.
fn ordered_candidates(html: &str) -> Vec<(&'static str, &'static str)> {
    let (seen, unseen): (Vec<_>, Vec<_>) = FIELD_CANDIDATES
        .iter()
        .copied()
        .partition(|(nif_field, _)| html.contains(nif_field));
    seen.into_iter().chain(unseen).collect()
}

fn build_form(
    viewstate: &str,
    eventvalidation: &str,
    nif_field: &str,
    submit_field: &str,
    nif: &str,
) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("__VIEWSTATE", viewstate)
        .append_pair("__EVENTVALIDATION", eventvalidation)
        .append_pair(nif_field, nif)
        .append_pair(submit_field, "Pesquisar")
        .finish()
}

fn tag_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag strip regex"))
}

fn strip_tags(html: &str) -> String {
    let text = tag_strip_re().replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_cae_code(cell: &str) -> bool {
    cell.len() == 5 && cell.chars().all(|c| c.is_ascii_digit())
}

/// Two-pass extraction. Pass one walks table rows looking for the row
/// carrying the queried NIF (or, failing that, any row with a 5-digit
/// code) and reads name/codes/descriptions from its cells. Pass two drops
/// to "any 5-digit codes anywhere", which loses names and descriptions
/// but still yields the codes.
fn parse_result_html(html: &str, nif: &str) -> Option<CompanyRecord> {
    static ROW_RE: OnceLock<Regex> = OnceLock::new();
    static CELL_RE: OnceLock<Regex> = OnceLock::new();
    let row_re =
        ROW_RE.get_or_init(|| Regex::new(r"(?s)<tr[^>]*>(.*?)</tr>").expect("row regex"));
    let cell_re =
        CELL_RE.get_or_init(|| Regex::new(r"(?s)<t[dh][^>]*>(.*?)</t[dh]>").expect("cell regex"));

    // Pass 1: structured table.
    let mut fallback_row: Option<CompanyRecord> = None;
    for row in row_re.captures_iter(html) {
        let cells: Vec<String> = cell_re
            .captures_iter(&row[1])
            .map(|c| strip_tags(&c[1]))
            .collect();
        if cells.len() < 2 || !cells.iter().any(|c| is_cae_code(c)) {
            continue;
        }

        let record = record_from_cells(&cells, nif);
        if cells.iter().any(|c| c == nif) {
            return Some(record);
        }
        fallback_row.get_or_insert(record);
    }
    if let Some(record) = fallback_row {
        return Some(record);
    }

    // Pass 2: any 5-digit codes in the page text.
    static CODE_RE: OnceLock<Regex> = OnceLock::new();
    let code_re = CODE_RE.get_or_init(|| Regex::new(r"\b(\d{5})\b").expect("code regex"));
    let text = strip_tags(html);
    let mut codes: Vec<&str> = Vec::new();
    for m in code_re.captures_iter(&text) {
        let code = m.get(1).expect("code capture").as_str();
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    if codes.is_empty() {
        return None;
    }
    Some(CompanyRecord {
        cae1_code: codes.first().copied().unwrap_or_default().to_string(),
        cae2_code: codes.get(1).copied().unwrap_or_default().to_string(),
        ..CompanyRecord::default()
    })
}

fn record_from_cells(cells: &[String], nif: &str) -> CompanyRecord {
    let mut record = CompanyRecord::default();

    let code_positions: Vec<usize> = cells
        .iter()
        .enumerate()
        .filter(|(_, c)| is_cae_code(c))
        .map(|(i, _)| i)
        .collect();

    if let Some(&first) = code_positions.first() {
        record.cae1_code = cells[first].clone();
        record.cae1_desc = cells
            .get(first + 1)
            .filter(|c| !is_cae_code(c) && *c != nif)
            .cloned()
            .unwrap_or_default();
    }
    if let Some(&second) = code_positions.get(1) {
        record.cae2_code = cells[second].clone();
        record.cae2_desc = cells
            .get(second + 1)
            .filter(|c| !is_cae_code(c) && *c != nif)
            .cloned()
            .unwrap_or_default();
    }

    record.official_name = cells
        .iter()
        .find(|c| !c.is_empty() && !is_cae_code(c) && *c != nif && !c.chars().all(|ch| ch.is_ascii_digit()))
        .cloned()
        .unwrap_or_default();

    record
}
