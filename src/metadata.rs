// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Deployment identity from the cloud instance-metadata service.
//!
//! The identity (the runtime service-account email) is the anchor of the
//! whole scheme: attestations are only trusted when their certificate embeds
//! it. It is fetched exactly once at startup; a deployment that cannot learn
//! its identity cannot produce or verify attestations and must not serve.

use anyhow::{bail, Context, Result};

pub const METADATA_BASE_URL: &str = "http://metadata.google.internal";

const EMAIL_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/email";
const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Client for the instance-metadata identity endpoints.
#[derive(Clone)]
pub struct MetadataClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new(METADATA_BASE_URL)
    }
}

impl MetadataClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The service-account email, verbatim. This is the deployment identity.
    pub async fn service_account_email(&self) -> Result<String> {
        self.get(&format!("{}{}", self.base_url, EMAIL_PATH))
            .await
            .context("fetching service account email from instance metadata")
    }

    /// An identity token bound to the given audience, usable as a bearer
    /// credential against the certificate issuer.
    pub async fn identity_token(&self, audience: &str) -> Result<String> {
        self.get(&format!(
            "{}{}?audience={audience}",
            self.base_url, IDENTITY_PATH
        ))
        .await
        .context("fetching identity token from instance metadata")
    }

    async fn get(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("unexpected status code: {status}: {body}");
        }
        Ok(body)
    }
}
