// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Vsock accept loop.
//!
//! Connections are served strictly one at a time, end-to-end: accept, read
//! one frame, handle, write one frame, close. The underlying vsock reads
//! and the NSM ioctl are blocking syscalls, and a request's internal
//! ordering (fetch → nonce → attestation → reply) must not interleave with
//! another request's, so sequential processing is the contract here, not
//! an oversight. The host router queues upstream.

use std::io::{Read, Write};
use std::thread;

use anyhow::{Context, Result, anyhow};
use vsock::VsockListener;

use crate::constants::{ACCEPT_RETRY_DELAY, ENCLAVE_PORT};
use crate::handler::{self, ServiceConfig};
use crate::models::{EnclaveRequest, EnclaveResponse};
use crate::protocol::{recv_message, send_message};

/// Binds the listener and serves forever. Only a bind failure returns.
pub fn serve(config: &ServiceConfig) -> Result<()> {
    let listener = VsockListener::bind_with_cid_port(libc::VMADDR_CID_ANY, ENCLAVE_PORT)
        .with_context(|| format!("failed to bind vsock listener on port {ENCLAVE_PORT}"))?;

    println!(
        "[{}] listening on vsock port {ENCLAVE_PORT}",
        config.name
    );

    for conn in listener.incoming() {
        let stream = match conn {
            Ok(stream) => stream,
            Err(err) => {
                println!("[{}] accept failed: {err:?}", config.name);
                thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };

        if let Ok(addr) = stream.peer_addr() {
            println!(
                "[{}] connection from cid={} port={}",
                config.name,
                addr.cid(),
                addr.port()
            );
        }

        if let Err(err) = handle_connection(config, stream) {
            println!("[{}] connection failed: {err:?}", config.name);
        }
        // The stream drops (and closes) here before the next accept.
    }

    Ok(())
}

/// One request/reply exchange. Errors that can still be answered are sent
/// back as a 500 envelope; close failures are swallowed.
fn handle_connection<S: Read + Write>(config: &ServiceConfig, mut stream: S) -> Result<()> {
    let payload = match recv_message(&mut stream) {
        Ok(payload) => payload,
        Err(err) => {
            let err = anyhow!("failed to receive request frame: {err}");
            send_error(config, &mut stream, &err);
            return Err(err);
        }
    };

    let request: EnclaveRequest = match serde_json::from_slice(&payload) {
        Ok(request) => request,
        Err(err) => {
            let response =
                EnclaveResponse::failure(400, format!("failed to parse request: {err}"));
            return reply(&mut stream, &response);
        }
    };

    println!(
        "[{}] request id={} {} {}",
        config.name,
        request.log_id(),
        request.method,
        request.url
    );

    let response = handler::handle_request(config, &request);

    println!(
        "[{}] reply id={} success={} status={}",
        config.name,
        request.log_id(),
        response.success,
        response.status
    );

    reply(&mut stream, &response)
}

fn reply<S: Write>(stream: &mut S, response: &EnclaveResponse) -> Result<()> {
    let payload = serde_json::to_string(response).context("failed to serialise response")?;
    send_message(stream, &payload).map_err(|err| anyhow!("failed to send reply frame: {err}"))
}

fn send_error<S: Write>(config: &ServiceConfig, stream: &mut S, err: &anyhow::Error) {
    let response = EnclaveResponse::failure(500, err.to_string());
    if let Err(send_err) = reply(stream, &response) {
        println!("[{}] failed to send error reply: {send_err:?}", config.name);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::handler::{AllowlistEntry, Transport};
    use crate::services::ServiceHandler;

    const CONFIG: ServiceConfig = ServiceConfig {
        name: "test",
        allowlist: &[AllowlistEntry {
            hostname: "example.org",
            proxy_port: 8443,
            transport: Transport::Tls,
        }],
        handler: ServiceHandler::Generic,
    };

    /// A duplex stand-in: reads from the request buffer, collects writes.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn framed(payload: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        send_message(&mut buf, payload).unwrap();
        buf
    }

    fn reply_of(stream: MockStream) -> EnclaveResponse {
        let frame = recv_message(&mut Cursor::new(stream.output)).unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[test]
    fn malformed_json_yields_a_400_envelope() {
        let mut stream = MockStream {
            input: Cursor::new(framed("{not json")),
            output: Vec::new(),
        };
        handle_connection(&CONFIG, &mut stream).unwrap();

        let response = reply_of(stream);
        assert!(!response.success);
        assert_eq!(response.status, 400);
        assert!(response.attestation.is_none());
    }

    #[test]
    fn disallowed_host_yields_a_403_envelope() {
        let request = r#"{"id":"req-9","url":"https://api.stripe.com/v1/charges","method":"GET"}"#;
        let mut stream = MockStream {
            input: Cursor::new(framed(request)),
            output: Vec::new(),
        };
        handle_connection(&CONFIG, &mut stream).unwrap();

        let response = reply_of(stream);
        assert_eq!(response.status, 403);
        assert_eq!(
            response.error.as_deref(),
            Some("Host not allowed: api.stripe.com")
        );
    }

    #[test]
    fn truncated_frame_produces_a_500_envelope() {
        let mut input = framed(r#"{"url":"https://example.org/","method":"GET"}"#);
        input.truncate(input.len() - 4);
        let mut stream = MockStream {
            input: Cursor::new(input),
            output: Vec::new(),
        };
        assert!(handle_connection(&CONFIG, &mut stream).is_err());

        let response = reply_of(stream);
        assert!(!response.success);
        assert_eq!(response.status, 500);
    }
}
