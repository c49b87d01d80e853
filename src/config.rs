// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Transparency-log settings, read from the environment.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_AUDIENCE: &str = "sigstore";
pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";
pub const DEFAULT_FULCIO_URL: &str = "https://fulcio.sigstore.dev";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for the identity, issuer and log clients.
///
/// Every field has a production default; deployments against a private
/// sigstore stack override the URLs.
#[derive(Clone, Debug)]
pub struct TlogConfig {
    /// Audience bound into identity tokens.
    pub audience: String,

    /// Transparency log base URL.
    pub rekor_url: String,

    /// Certificate issuer base URL.
    pub fulcio_url: String,

    /// Per-call timeout for log operations.
    pub rekor_timeout: Duration,

    /// Per-call timeout for issuer operations.
    pub fulcio_timeout: Duration,
}

impl Default for TlogConfig {
    fn default() -> Self {
        Self {
            audience: DEFAULT_AUDIENCE.to_string(),
            rekor_url: DEFAULT_REKOR_URL.to_string(),
            fulcio_url: DEFAULT_FULCIO_URL.to_string(),
            rekor_timeout: DEFAULT_TIMEOUT,
            fulcio_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TlogConfig {
    /// Read the configuration from `AUDIENCE`, `REKOR_URL`, `FULCIO_URL`,
    /// `REKOR_TIMEOUT` and `FULCIO_TIMEOUT`, falling back to the defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            audience: env_or("AUDIENCE", defaults.audience),
            rekor_url: trim_url(env_or("REKOR_URL", defaults.rekor_url)),
            fulcio_url: trim_url(env_or("FULCIO_URL", defaults.fulcio_url)),
            rekor_timeout: timeout_from_env("REKOR_TIMEOUT")?.unwrap_or(defaults.rekor_timeout),
            fulcio_timeout: timeout_from_env("FULCIO_TIMEOUT")?.unwrap_or(defaults.fulcio_timeout),
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default,
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn timeout_from_env(key: &str) -> Result<Option<Duration>> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => {
            let d = parse_duration(&v).with_context(|| format!("parsing {key}={v}"))?;
            Ok(Some(d))
        }
        _ => Ok(None),
    }
}

/// Parse durations of the form `30s`, `1m`, `2h` or bare seconds (`90`).
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let value: u64 = value
        .parse()
        .with_context(|| format!("invalid duration {s:?}"))?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => bail!("invalid duration unit {unit:?} in {s:?}"),
    };
    Ok(Duration::from_secs(secs))
}
