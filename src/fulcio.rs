// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Ephemeral signing keys certified by the issuer.
//!
//! Every recorded binding is signed with a fresh P-256 key that lives for a
//! single operation. The issuer binds the key to the deployment identity: the
//! request carries the identity token as the bearer credential plus an ECDSA
//! signature over the SHA-256 of the identity string, proving the ephemeral
//! key was in the hands of the token holder.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use rand::rngs::OsRng;
use serde::Serialize;

const SIGNING_CERT_PATH: &str = "/api/v1/signingCert";
const ROOT_CERT_PATH: &str = "/api/v1/rootCert";

/// Client for the certificate issuer's REST API.
#[derive(Clone)]
pub struct FulcioClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

/// A certificate issued for one ephemeral key.
#[derive(Clone, Debug)]
pub struct IssuedCertificate {
    /// The signing (leaf) certificate, PEM-encoded. This is what gets
    /// submitted to the log alongside the envelope.
    pub leaf_pem: String,

    /// The full chain as returned by the issuer, leaf first.
    pub chain_pem: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningCertRequest {
    public_key: PublicKeyRequest,
    signed_email_address: String,
}

#[derive(Serialize)]
struct PublicKeyRequest {
    algorithm: &'static str,
    content: String,
}

impl FulcioClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Generate a fresh P-256 keypair and exchange it for a short-lived
    /// code-signing certificate bound to `identity`.
    pub async fn issue_certificate(
        &self,
        identity_token: &str,
        identity: &str,
    ) -> Result<(SigningKey, IssuedCertificate)> {
        let key = SigningKey::random(&mut OsRng);
        let spki = key
            .verifying_key()
            .to_public_key_der()
            .context("encoding ephemeral public key")?;

        // Proof of possession: the ephemeral key signs the identity the
        // bearer token asserts, so a stolen token cannot certify an
        // unrelated key.
        let proof: Signature = key.sign(identity.as_bytes());

        let request = SigningCertRequest {
            public_key: PublicKeyRequest {
                algorithm: "ecdsa",
                content: STANDARD.encode(spki.as_bytes()),
            },
            signed_email_address: STANDARD.encode(proof.to_der().as_bytes()),
        };

        let resp = self
            .client
            .post(format!("{}{SIGNING_CERT_PATH}", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(identity_token)
            .json(&request)
            .send()
            .await
            .context("requesting signing certificate")?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("issuer returned {status}: {body}");
        }

        let leaf_pem = first_certificate(&body)?;
        Ok((
            key,
            IssuedCertificate {
                leaf_pem,
                chain_pem: body,
            },
        ))
    }

    /// The issuer's published root and intermediate certificates, as one PEM
    /// document. Fetched once at startup; entry verification trusts nothing
    /// else.
    pub async fn root_certificates(&self) -> Result<String> {
        let resp = self
            .client
            .get(format!("{}{ROOT_CERT_PATH}", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .context("fetching issuer root certificates")?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("issuer returned {status}: {body}");
        }
        Ok(body)
    }
}

/// The first certificate block of a PEM document.
fn first_certificate(pem: &str) -> Result<String> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";
    let start = pem
        .find(BEGIN)
        .context("issuer response contains no certificate")?;
    let end = pem[start..]
        .find(END)
        .context("issuer response contains an unterminated certificate")?;
    Ok(format!("{}\n", &pem[start..start + end + END.len()]))
}
