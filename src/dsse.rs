// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The tag-binding attestation and its signing envelope.
//!
//! A binding is an in-toto statement whose subject is the fully qualified
//! tag reference and whose predicate carries the observed digest. The
//! subject digest is the SHA-256 of the tag string itself, not of any image
//! content: that hash is what the transparency log indexes, so lookups for
//! a tag find exactly the entries recorded for it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";
pub const PREDICATE_TYPE: &str = "tlogistry-fetched";
const STATEMENT_TYPE: &str = "intoto";

/// In-toto statement binding a tag to a digest.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    pub subject: Vec<Subject>,
    pub predicate: Predicate,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub digest: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Predicate {
    pub tag: String,
    pub digest: String,
}

impl Statement {
    pub fn for_binding(tag: &str, digest: &str) -> Self {
        Self {
            statement_type: STATEMENT_TYPE.to_string(),
            predicate_type: PREDICATE_TYPE.to_string(),
            subject: vec![Subject {
                name: tag.to_string(),
                digest: BTreeMap::from([("sha256".to_string(), tag_index_key(tag))]),
            }],
            predicate: Predicate {
                tag: tag.to_string(),
                digest: digest.to_string(),
            },
        }
    }
}

/// The log index key for a tag: hex SHA-256 of the canonical tag string.
/// Recording and lookup must agree on this byte-for-byte.
pub fn tag_index_key(tag: &str) -> String {
    format!("{:x}", Sha256::digest(tag.as_bytes()))
}

/// DSSE envelope with a single signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    pub payload: String,
    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    pub sig: String,
}

/// DSSE pre-authentication encoding:
/// `"DSSEv1" SP len(type) SP type SP len(payload) SP payload`.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    out.extend_from_slice(b"DSSEv1 ");
    out.extend_from_slice(payload_type.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

/// Build and sign the envelope for one `tag -> digest` binding.
///
/// The signature covers the PAE of the serialized statement; the returned
/// string is the envelope JSON exactly as it is submitted to the log.
pub fn sign_binding(key: &SigningKey, tag: &str, digest: &str) -> Result<String> {
    let statement =
        serde_json::to_vec(&Statement::for_binding(tag, digest)).context("encoding statement")?;
    let signature: Signature = key.sign(&pae(PAYLOAD_TYPE, &statement));

    let envelope = Envelope {
        payload_type: PAYLOAD_TYPE.to_string(),
        payload: STANDARD.encode(&statement),
        signatures: vec![EnvelopeSignature {
            sig: STANDARD.encode(signature.to_der().as_bytes()),
        }],
    };
    serde_json::to_string(&envelope).context("encoding envelope")
}
