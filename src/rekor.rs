// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Transparency log REST client.
//!
//! Only three operations are needed: propose an `intoto` entry, search the
//! index by the tag hash, and fetch an entry by UUID. The models are written
//! by hand against the log's `intoto` v0.0.1 schema; entries are otherwise
//! treated as opaque.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

const ENTRIES_PATH: &str = "/api/v1/log/entries";
const INDEX_PATH: &str = "/api/v1/index/retrieve";

/// Proposed `intoto` entry, schema version 0.0.1.
#[derive(Clone, Debug, Serialize)]
pub struct ProposedIntotoEntry {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub spec: IntotoSpec,
}

#[derive(Clone, Debug, Serialize)]
pub struct IntotoSpec {
    pub content: IntotoContent,
    /// Base64 of the PEM-encoded signing certificate.
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IntotoContent {
    pub envelope: String,
}

impl ProposedIntotoEntry {
    pub fn new(envelope: String, certificate_pem: &str) -> Self {
        Self {
            kind: "intoto".to_string(),
            api_version: "0.0.1".to_string(),
            spec: IntotoSpec {
                content: IntotoContent { envelope },
                public_key: STANDARD.encode(certificate_pem.as_bytes()),
            },
        }
    }
}

/// The per-UUID record of a returned log entry.
#[derive(Clone, Debug, Deserialize)]
pub struct EntryRecord {
    /// Base64 of the canonicalized entry body.
    pub body: Option<String>,
    #[serde(rename = "integratedTime", default)]
    pub integrated_time: i64,
    #[serde(rename = "logIndex", default)]
    pub log_index: i64,
    pub attestation: Option<AttestationRecord>,
}

/// The decoded envelope payload, re-encoded as base64 by the log.
#[derive(Clone, Debug, Deserialize)]
pub struct AttestationRecord {
    pub data: Option<String>,
}

/// A log entry together with its UUID.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub uuid: String,
    pub record: EntryRecord,
}

/// Decoded form of an `intoto` entry body, as far as the proxy cares: the
/// embedded signing certificate.
#[derive(Debug, Deserialize)]
pub struct IntotoEntryBody {
    pub spec: IntotoEntryBodySpec,
}

#[derive(Debug, Deserialize)]
pub struct IntotoEntryBodySpec {
    #[serde(rename = "publicKey", default)]
    pub public_key: Option<String>,
}

/// Client for the transparency log's REST API.
#[derive(Clone)]
pub struct RekorClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RekorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Submit a proposed entry; returns the integrated entry.
    pub async fn create_entry(&self, entry: &ProposedIntotoEntry) -> Result<LogEntry> {
        let resp = self
            .client
            .post(format!("{}{ENTRIES_PATH}", self.base_url))
            .timeout(self.timeout)
            .json(entry)
            .send()
            .await
            .context("creating log entry")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("log returned {status}: {body}");
        }
        let entries: HashMap<String, EntryRecord> =
            resp.json().await.context("decoding created log entry")?;
        single_entry(entries)
    }

    /// UUIDs of entries indexed under the given hex SHA-256 hash.
    pub async fn search_index(&self, hash: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .post(format!("{}{INDEX_PATH}", self.base_url))
            .timeout(self.timeout)
            .json(&serde_json::json!({ "hash": hash }))
            .send()
            .await
            .context("searching log index")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("log returned {status}: {body}");
        }
        resp.json().await.context("decoding index search response")
    }

    /// Fetch one entry by UUID.
    pub async fn get_entry(&self, uuid: &str) -> Result<LogEntry> {
        let resp = self
            .client
            .get(format!("{}{ENTRIES_PATH}/{uuid}", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .context("fetching log entry")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("log returned {status}: {body}");
        }
        let entries: HashMap<String, EntryRecord> =
            resp.json().await.context("decoding log entry")?;
        single_entry(entries)
    }
}

fn single_entry(entries: HashMap<String, EntryRecord>) -> Result<LogEntry> {
    if entries.len() != 1 {
        bail!("log returned {} entries, want exactly one", entries.len());
    }
    let (uuid, record) = entries.into_iter().next().expect("length checked above");
    Ok(LogEntry { uuid, record })
}
