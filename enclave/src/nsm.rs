// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Nitro Security Module client.
//!
//! Requests an attestation document over the `/dev/nsm` ioctl and lifts
//! PCR0–PCR2 out of the COSE_Sign1 payload for the response envelope. The
//! COSE blob itself is always the authoritative artefact: if the payload
//! cannot be parsed the PCR fields degrade to empty strings and the
//! attestation still succeeds — verifiers reparse the document anyway.

use anyhow::{Result, anyhow, bail};
use ciborium::Value as CborValue;
use coset::{CborSerializable, CoseSign1, TaggedCborSerializable};
use data_encoding::HEXLOWER;

use crate::models::PcrSet;

/// Requests a COSE_Sign1 attestation document bound to `nonce`.
///
/// The nonce here is the raw bytes of the hex digest computed by the
/// attestor — deterministic per response, not an anti-replay secret.
#[cfg(target_env = "musl")]
pub fn attestation_document(nonce: &[u8]) -> Result<Vec<u8>> {
    use aws_nitro_enclaves_nsm_api::api::{Request, Response};
    use aws_nitro_enclaves_nsm_api::driver;
    use serde_bytes::ByteBuf;

    let nsm_fd = driver::nsm_init();
    if nsm_fd < 0 {
        bail!("failed to open NSM device: fd={nsm_fd}");
    }

    let request = Request::Attestation {
        user_data: None,
        nonce: Some(ByteBuf::from(nonce.to_vec())),
        public_key: None,
    };

    let response = driver::nsm_process_request(nsm_fd, request);
    driver::nsm_exit(nsm_fd);

    match response {
        Response::Attestation { document } => Ok(document),
        Response::Error(code) => bail!("NSM attestation failed: {code:?}"),
        _ => bail!("unexpected NSM response type"),
    }
}

/// Stub for non-musl targets (development/testing): attestation documents
/// exist only inside a Nitro Enclave image.
#[cfg(not(target_env = "musl"))]
pub fn attestation_document(nonce: &[u8]) -> Result<Vec<u8>> {
    if nonce.is_empty() {
        bail!("nonce is required for attestation");
    }
    Err(anyhow!(
        "attestation documents are only available inside a Nitro Enclave (musl target)"
    ))
}

/// Lifts PCR0–PCR2 from a COSE_Sign1 attestation document, degrading to
/// empty strings on any parse failure.
pub fn extract_pcrs(document: &[u8]) -> PcrSet {
    match try_extract_pcrs(document) {
        Ok(pcrs) => pcrs,
        Err(err) => {
            println!("[enclave] PCR extraction failed, returning empty PCRs: {err:?}");
            PcrSet::default()
        }
    }
}

fn try_extract_pcrs(document: &[u8]) -> Result<PcrSet> {
    // The NSM emits tag 18; tolerate its absence.
    let cose = CoseSign1::from_tagged_slice(document)
        .or_else(|_| CoseSign1::from_slice(document))
        .map_err(|e| anyhow!("not a COSE_Sign1 document: {e:?}"))?;

    let payload = cose
        .payload
        .as_ref()
        .ok_or_else(|| anyhow!("COSE_Sign1 has no payload"))?;

    let cbor: CborValue = ciborium::from_reader(payload.as_slice())
        .map_err(|e| anyhow!("payload is not CBOR: {e:?}"))?;
    let map = match cbor {
        CborValue::Map(m) => m,
        _ => bail!("attestation payload is not a CBOR map"),
    };

    let mut pcrs = PcrSet::default();
    for (k, v) in &map {
        if let CborValue::Text(key) = k
            && key == "pcrs"
            && let CborValue::Map(pcr_map) = v
        {
            for (idx, value) in pcr_map {
                if let CborValue::Integer(idx) = idx
                    && let CborValue::Bytes(bytes) = value
                {
                    let idx: i128 = (*idx).into();
                    let hex = HEXLOWER.encode(bytes);
                    match idx {
                        0 => pcrs.pcr0 = hex,
                        1 => pcrs.pcr1 = hex,
                        2 => pcrs.pcr2 = hex,
                        _ => {}
                    }
                }
            }
            return Ok(pcrs);
        }
    }

    bail!("attestation payload has no pcrs map")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal COSE_Sign1 whose payload is a CBOR map carrying a
    /// `pcrs` sub-map, matching the NSM document layout.
    fn fake_document(tagged: bool, with_pcrs: bool) -> Vec<u8> {
        let mut entries: Vec<(CborValue, CborValue)> = vec![(
            CborValue::Text("module_id".into()),
            CborValue::Text("i-0123-enc-4567".into()),
        )];
        if with_pcrs {
            let pcr_map = vec![
                (
                    CborValue::Integer(0.into()),
                    CborValue::Bytes(vec![0xaa; 48]),
                ),
                (
                    CborValue::Integer(1.into()),
                    CborValue::Bytes(vec![0xbb; 48]),
                ),
                (
                    CborValue::Integer(2.into()),
                    CborValue::Bytes(vec![0xcc; 48]),
                ),
                (
                    CborValue::Integer(8.into()),
                    CborValue::Bytes(vec![0xdd; 48]),
                ),
            ];
            entries.push((CborValue::Text("pcrs".into()), CborValue::Map(pcr_map)));
        }

        let mut payload = Vec::new();
        ciborium::into_writer(&CborValue::Map(entries), &mut payload).unwrap();

        let sign1 = coset::CoseSign1Builder::new()
            .payload(payload)
            .signature(vec![0u8; 96])
            .build();
        if tagged {
            sign1.to_tagged_vec().unwrap()
        } else {
            sign1.to_vec().unwrap()
        }
    }

    #[test]
    fn extracts_pcr0_through_pcr2() {
        let pcrs = extract_pcrs(&fake_document(true, true));
        assert_eq!(pcrs.pcr0, "aa".repeat(48));
        assert_eq!(pcrs.pcr1, "bb".repeat(48));
        assert_eq!(pcrs.pcr2, "cc".repeat(48));
    }

    #[test]
    fn accepts_untagged_cose() {
        let pcrs = extract_pcrs(&fake_document(false, true));
        assert_eq!(pcrs.pcr0, "aa".repeat(48));
    }

    #[test]
    fn degrades_to_empty_pcrs_on_missing_map() {
        let pcrs = extract_pcrs(&fake_document(true, false));
        assert_eq!(pcrs.pcr0, "");
        assert_eq!(pcrs.pcr1, "");
        assert_eq!(pcrs.pcr2, "");
    }

    #[test]
    fn degrades_to_empty_pcrs_on_garbage() {
        let pcrs = extract_pcrs(b"definitely not cbor");
        assert_eq!(pcrs.pcr0, "");
    }

    #[cfg(not(target_env = "musl"))]
    #[test]
    fn stub_refuses_outside_enclave() {
        let err = attestation_document(b"abc").unwrap_err();
        assert!(err.to_string().contains("Nitro Enclave"));
    }
}
