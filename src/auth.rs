// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Anonymous pull tokens for upstream registries.
//!
//! Registries advertise their token service in the `WWW-Authenticate`
//! challenge of an unauthenticated `/v2/` probe. The agent performs the
//! probe on every request and holds no token state.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use log::debug;
use oci_client::Reference;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::StatusCode;
use serde::Deserialize;

/// A parsed `WWW-Authenticate` challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    /// Lower-cased auth scheme, e.g. `bearer`.
    pub scheme: String,
    /// Lower-cased parameter names to unquoted values.
    pub params: HashMap<String, String>,
}

/// Parse a single challenge header value.
pub fn parse_challenge(value: &str) -> Option<Challenge> {
    let value = value.trim();
    let (scheme, rest) = match value.find(char::is_whitespace) {
        Some(pos) => (&value[..pos], &value[pos + 1..]),
        None => (value, ""),
    };
    if scheme.is_empty() {
        return None;
    }
    let mut params = HashMap::new();
    for part in split_outside_quotes(rest) {
        if let Some((key, val)) = part.split_once('=') {
            params.insert(
                key.trim().to_ascii_lowercase(),
                val.trim().trim_matches('"').to_string(),
            );
        }
    }
    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        params,
    })
}

fn split_outside_quotes(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in s.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
}

/// Fetches repository-scoped pull tokens. No caching: every request pays
/// for its own probe, and tokens never outlive the request they were
/// fetched for.
#[derive(Clone, Default)]
pub struct AuthAgent {
    client: reqwest::Client,
}

impl AuthAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pull token for the reference's repository, or `None` when the
    /// registry accepts anonymous reads.
    pub async fn token_for(&self, scheme: &str, reference: &Reference) -> Result<Option<String>> {
        let ping = format!("{scheme}://{}/v2/", reference.resolve_registry());
        debug!("--> GET {ping}");
        let resp = self
            .client
            .get(&ping)
            .send()
            .await
            .with_context(|| format!("probing {ping}"))?;
        debug!("<-- {}", resp.status());

        match resp.status() {
            StatusCode::OK => Ok(None),
            StatusCode::UNAUTHORIZED => {
                let challenge = resp
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_challenge);
                let Some(challenge) = challenge else {
                    // 401 without a usable challenge: nothing to do but try
                    // anonymously.
                    return Ok(None);
                };
                if challenge.scheme != "bearer" {
                    bail!("unsupported auth scheme: {}", challenge.scheme);
                }
                let realm = challenge
                    .params
                    .get("realm")
                    .context("bearer challenge has no realm")?;
                let service = challenge
                    .params
                    .get("service")
                    .map(String::as_str)
                    .unwrap_or_default();

                let url = format!(
                    "{realm}?scope=repository:{}:pull&service={service}",
                    reference.repository()
                );
                debug!("--> GET {url}");
                let resp = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .with_context(|| format!("fetching token from {realm}"))?;
                debug!("<-- {}", resp.status());
                if !resp.status().is_success() {
                    bail!("unexpected status code ({url}): {}", resp.status());
                }
                let token: TokenResponse = resp.json().await.context("decoding token response")?;
                Ok(Some(token.token).filter(|t| !t.is_empty()))
            }
            status => bail!("unexpected status code ({ping}): {status}"),
        }
    }
}
