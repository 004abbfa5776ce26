// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Minimal HTTP/1.1 client speaking through the host's vsock-proxy.
//!
//! Requests always close the connection (`Connection: close`), so a
//! response is simply "read until EOF" and there is no connection reuse to
//! manage. The response parser works at the byte level until the body has
//! been isolated; only the header region is ever decoded as ASCII.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::constants::FETCH_TIMEOUT;
use crate::transport::ProxyStream;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("upstream fetch exceeded {0:?}")]
    UpstreamTimeout(Duration),
    #[error("malformed status line: {0:?}")]
    MalformedStatus(String),
    #[error("response has no header terminator")]
    MissingHeaderTerminator,
    #[error("response headers are not ASCII")]
    NonAsciiHeaders,
    #[error("invalid chunked encoding: {0}")]
    InvalidChunk(&'static str),
    #[error("tls session failed: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    #[error("transport failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed upstream response. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Fetches over TLS negotiated inside the enclave. Certificate verification
/// is unconditional; the trust anchors are the webpki roots compiled into
/// the image.
pub fn proxy_fetch(
    hostname: &str,
    proxy_port: u32,
    method: &str,
    path: &str,
    headers: &[(String, String)],
    body: Option<&str>,
) -> Result<HttpResponse, FetchError> {
    let request = build_request(method, path, hostname, headers, body);

    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| FetchError::InvalidServerName(hostname.to_string()))?;
    let conn = ClientConnection::new(tls_config(), server_name)?;
    let vsock = ProxyStream::connect(proxy_port, FETCH_TIMEOUT).map_err(map_io)?;
    let mut tls = StreamOwned::new(conn, vsock);

    tls.write_all(&request).map_err(map_io)?;
    tls.flush().map_err(map_io)?;
    let raw = read_until_eof(&mut tls)?;

    parse_response(&raw)
}

/// Fetches over the bare proxy tunnel, no TLS. Reserved for public,
/// non-sensitive endpoints that only speak plain HTTP.
pub fn proxy_fetch_plain(
    hostname: &str,
    proxy_port: u32,
    method: &str,
    path: &str,
    headers: &[(String, String)],
    body: Option<&str>,
) -> Result<HttpResponse, FetchError> {
    let request = build_request(method, path, hostname, headers, body);

    let mut stream = ProxyStream::connect(proxy_port, FETCH_TIMEOUT).map_err(map_io)?;
    stream.write_all(&request).map_err(map_io)?;
    stream.flush().map_err(map_io)?;
    let raw = read_until_eof(&mut stream)?;

    parse_response(&raw)
}

fn map_io(e: std::io::Error) -> FetchError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        FetchError::UpstreamTimeout(FETCH_TIMEOUT)
    } else {
        FetchError::Io(e)
    }
}

fn tls_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

/// Serialises the request. Caller headers are written first, but `Host` and
/// `Connection` are always overlaid with our own values, and a
/// `Content-Length` reflecting the UTF-8 body length is appended when a
/// body is present.
fn build_request(
    method: &str,
    path: &str,
    hostname: &str,
    headers: &[(String, String)],
    body: Option<&str>,
) -> Vec<u8> {
    let mut head = format!("{method} {path} HTTP/1.1\r\n");
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Host: {hostname}\r\n"));
    head.push_str("Connection: close\r\n");
    if let Some(body) = body {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    let mut bytes = head.into_bytes();
    if let Some(body) = body {
        bytes.extend_from_slice(body.as_bytes());
    }
    bytes
}

/// Reads the stream to EOF. A TLS peer that drops without `close_notify`
/// surfaces as `UnexpectedEof`; with `Connection: close` semantics the
/// bytes received so far are the complete response, so that case is
/// accepted once data has arrived.
fn read_until_eof<S: Read>(stream: &mut S) -> Result<Vec<u8>, FetchError> {
    let mut raw = Vec::with_capacity(8 * 1024);
    let mut chunk = [0u8; 8 * 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && !raw.is_empty() => break,
            Err(e) => return Err(map_io(e)),
        }
    }
    Ok(raw)
}

fn status_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^HTTP/\d\.\d\s+(\d+)").expect("status regex"))
}

/// Parses a full HTTP/1.1 response held in memory.
///
/// The header/body split happens on raw bytes: the body may be multi-byte
/// UTF-8 and must not be decoded before the `\r\n\r\n` boundary is found.
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse, FetchError> {
    let split = find_header_end(raw).ok_or(FetchError::MissingHeaderTerminator)?;
    let (head, body) = raw.split_at(split);
    let body = &body[4..]; // skip the \r\n\r\n itself

    if !head.is_ascii() {
        return Err(FetchError::NonAsciiHeaders);
    }
    let head = std::str::from_utf8(head).map_err(|_| FetchError::NonAsciiHeaders)?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line_re()
        .captures(status_line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| FetchError::MalformedStatus(status_line.to_string()))?;

    let mut headers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(
                name.trim().to_ascii_lowercase(),
                value.trim().to_string(),
            );
        }
    }

    let body = if headers
        .get("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    {
        dechunk(body)?
    } else {
        body.to_vec()
    };

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reassembles a chunked body: hex size, CRLF, payload, CRLF, repeated
/// until the zero-size chunk. Runs on bytes; chunk payloads may split
/// multi-byte UTF-8 sequences at arbitrary points.
fn dechunk(mut raw: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::with_capacity(raw.len());
    loop {
        let line_end = raw
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(FetchError::InvalidChunk("missing chunk-size terminator"))?;
        let size_str = std::str::from_utf8(&raw[..line_end])
            .map_err(|_| FetchError::InvalidChunk("chunk size is not ASCII"))?;
        // Chunk extensions (";...") are permitted by the grammar; drop them.
        let size_str = size_str.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| FetchError::InvalidChunk("chunk size is not hex"))?;

        raw = &raw[line_end + 2..];
        if size == 0 {
            break;
        }
        if raw.len() < size + 2 {
            return Err(FetchError::InvalidChunk("chunk payload truncated"));
        }
        body.extend_from_slice(&raw[..size]);
        if &raw[size..size + 2] != b"\r\n" {
            return Err(FetchError::InvalidChunk("chunk payload not CRLF-terminated"));
        }
        raw = &raw[size + 2..];
    }
    Ok(body)
}
