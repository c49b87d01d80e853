// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The log controller: recording and looking up tag bindings.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::config::TlogConfig;
use crate::dsse;
use crate::fulcio::FulcioClient;
use crate::metadata::MetadataClient;
use crate::rekor::{ProposedIntotoEntry, RekorClient};
use crate::verify::{self, TrustRoots};

/// Provenance of a log entry, surfaced to clients as response headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Info {
    pub uuid: String,
    pub log_index: i64,
    pub integrated_time: DateTime<Utc>,
}

/// Owns the identity and the issuer/log clients for the process lifetime.
///
/// The deployment identity is a construction-time dependency: without it
/// there is nothing to bind attestations to and nothing to filter returned
/// entries by, so a controller cannot exist without one.
pub struct TlogController {
    identity: String,
    audience: String,
    metadata: MetadataClient,
    fulcio: FulcioClient,
    rekor: RekorClient,
    trust: TrustRoots,
}

impl TlogController {
    /// Build the controller and fetch the issuer trust roots.
    pub async fn new(
        config: &TlogConfig,
        identity: String,
        metadata: MetadataClient,
    ) -> Result<Self> {
        let fulcio = FulcioClient::new(&config.fulcio_url, config.fulcio_timeout);
        let rekor = RekorClient::new(&config.rekor_url, config.rekor_timeout);
        let roots_pem = fulcio.root_certificates().await?;
        let trust = TrustRoots::from_pem(roots_pem.as_bytes())
            .context("parsing issuer trust roots")?;
        Ok(Self {
            identity,
            audience: config.audience.clone(),
            metadata,
            fulcio,
            rekor,
            trust,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Record `tag -> digest` in the log under a fresh ephemeral key.
    pub async fn record_binding(&self, tag: &str, digest: &str) -> Result<Info> {
        let token = self
            .metadata
            .identity_token(&self.audience)
            .await
            .context("acquiring identity token")?;
        let (key, certificate) = self
            .fulcio
            .issue_certificate(&token, &self.identity)
            .await
            .context("issuing signing certificate")?;
        let envelope = dsse::sign_binding(&key, tag, digest)?;
        let entry = self
            .rekor
            .create_entry(&ProposedIntotoEntry::new(envelope, &certificate.leaf_pem))
            .await
            .context("creating log entry")?;

        let integrated_time = DateTime::from_timestamp(entry.record.integrated_time, 0)
            .context("created entry has an invalid integrated time")?;
        info!(
            "recorded binding {tag} -> {digest}: uuid={} logIndex={} integratedTime={}",
            entry.uuid,
            entry.record.log_index,
            integrated_time.to_rfc3339()
        );
        Ok(Info {
            uuid: entry.uuid,
            log_index: entry.record.log_index,
            integrated_time,
        })
    }

    /// Find the digest the log has pinned for `tag`, if any.
    ///
    /// Duplicate entries for the same digest collapse (concurrent first
    /// sightings are benign); two distinct digests under our identity mean
    /// the upstream changed the tag inside the pinning window, and the tag
    /// is deliberately wedged.
    pub async fn lookup_binding(&self, tag: &str) -> Result<Option<(String, Info)>> {
        let uuids = self
            .rekor
            .search_index(&dsse::tag_index_key(tag))
            .await
            .context("searching log index")?;
        if uuids.is_empty() {
            return Ok(None);
        }

        let mut found: HashMap<String, Info> = HashMap::new();
        for uuid in uuids {
            let entry = match self.rekor.get_entry(&uuid).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("fetching log entry {uuid}: {e:#}");
                    continue;
                }
            };
            if let Some((digest, info)) =
                verify::accept_entry(&entry, tag, &self.identity, &self.trust)
            {
                found.insert(digest, info);
            }
        }

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.into_iter().next()),
            _ => {
                let mut digests: Vec<String> = found.into_keys().collect();
                digests.sort();
                bail!(
                    "multiple digests recorded for {tag}: {}",
                    digests.join(", ")
                );
            }
        }
    }
}
