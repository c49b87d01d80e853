// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Parsing of registry API paths into upstream references.
//!
//! A proxied path has the form `/v2/<repo-path>/<kind>/<ref>`, where the
//! repository path may span several segments and carries the upstream
//! registry host as its first segment (`/v2/ubuntu/manifests/latest` is
//! shorthand for Docker Hub, exactly as the OCI naming grammar defines).

use anyhow::{anyhow, bail, Result};
use oci_client::Reference;

pub const DIGEST_SHA256_PREFIX: &str = "sha256:";

/// The two proxied endpoint kinds of the registry API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Manifests,
    Blobs,
}

impl RequestKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "manifests" => Some(RequestKind::Manifests),
            "blobs" => Some(RequestKind::Blobs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Manifests => "manifests",
            RequestKind::Blobs => "blobs",
        }
    }
}

/// A proxied request, parsed and validated against the OCI naming grammar.
#[derive(Clone, Debug)]
pub struct ParsedRequest {
    pub reference: Reference,
    pub kind: RequestKind,
    /// The trailing path segment: a tag or a digest.
    pub target: String,
}

impl ParsedRequest {
    /// Parse `/v2/<repo-path>/<kind>/<ref>`.
    pub fn parse(path: &str) -> Result<Self> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 5 || !parts[0].is_empty() || parts[1] != "v2" {
            bail!("path {path:?} is not of the form /v2/<repository>/<kind>/<reference>");
        }
        let kind = RequestKind::parse(parts[parts.len() - 2])
            .ok_or_else(|| anyhow!("unsupported endpoint {:?}", parts[parts.len() - 2]))?;
        let target = parts[parts.len() - 1].to_string();
        let repo = parts[2..parts.len() - 2].join("/");
        if repo.is_empty() || target.is_empty() {
            bail!("path {path:?} has an empty repository or reference");
        }

        // Digests attach with `@`, tags with `:`. Validation of both the
        // repository and the reference happens in the OCI reference parser.
        let separator = if target.contains(':') { "@" } else { ":" };
        let reference = Reference::try_from(format!("{repo}{separator}{target}"))
            .map_err(|e| anyhow!("parsing reference {repo}/{target}: {e}"))?;

        Ok(Self {
            reference,
            kind,
            target,
        })
    }

    /// A manifest request addressed by mutable tag. Only these interact
    /// with the transparency log.
    pub fn is_tag_manifest(&self) -> bool {
        self.kind == RequestKind::Manifests && !self.target.starts_with(DIGEST_SHA256_PREFIX)
    }

    /// The canonical, fully qualified tag string. This is the attestation
    /// subject and the preimage of the log index key.
    pub fn tag_string(&self) -> String {
        self.reference.whole()
    }

    /// The upstream URL this request proxies to.
    pub fn upstream_url(&self, scheme: &str) -> String {
        format!(
            "{scheme}://{}/v2/{}/{}/{}",
            self.reference.resolve_registry(),
            self.reference.repository(),
            self.kind.as_str(),
            self.target
        )
    }
}
