// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Verification of returned log entries.
//!
//! An entry is only trusted if the certificate embedded in its body chains
//! to the issuer's published roots, carries the code-signing key usage, and
//! names this deployment's identity as its single email. Validation runs
//! with the clock pinned to the certificate's own NotBefore: issuer
//! certificates live for minutes, and an entry signed while its certificate
//! was live stays verifiable forever. Freshness comes from the log's
//! integrated time, not from the certificate window.
//!
//! A failed check skips the entry; it never fails the lookup.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, warn};
use serde::Deserialize;
use x509_parser::prelude::*;

use crate::dsse;
use crate::rekor::{IntotoEntryBody, LogEntry};
use crate::tlog::Info;

const MAX_CHAIN_DEPTH: usize = 4;

/// The issuer's published trust anchors, split into self-signed roots and
/// intermediates.
pub struct TrustRoots {
    roots: Vec<Vec<u8>>,
    intermediates: Vec<Vec<u8>>,
}

impl TrustRoots {
    /// Split a PEM document into roots (self-signed) and intermediates.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut roots = Vec::new();
        let mut intermediates = Vec::new();
        for item in Pem::iter_from_buffer(pem) {
            let item = item.context("reading issuer trust root PEM")?;
            if item.label != "CERTIFICATE" {
                continue;
            }
            let (_, cert) = parse_x509_certificate(&item.contents)
                .map_err(|e| anyhow!("parsing issuer trust root: {e}"))?;
            let self_signed = cert.subject().as_raw() == cert.issuer().as_raw();
            if self_signed {
                roots.push(item.contents);
            } else {
                intermediates.push(item.contents);
            }
        }
        if roots.is_empty() {
            bail!("issuer trust chain contains no self-signed root");
        }
        Ok(Self {
            roots,
            intermediates,
        })
    }
}

/// The slice of an attestation document the consistency check needs.
/// Deserialized loosely so that unrelated entries fail the checks rather
/// than the decoder.
#[derive(Debug, Default, Deserialize)]
struct AttestationDoc {
    #[serde(rename = "predicateType", default)]
    predicate_type: String,
    #[serde(default)]
    predicate: AttestationPredicate,
}

#[derive(Debug, Default, Deserialize)]
struct AttestationPredicate {
    #[serde(default)]
    tag: String,
    #[serde(default)]
    digest: String,
}

/// Run all acceptance checks against one returned entry.
///
/// Returns the asserted digest and provenance on success. A skipped entry
/// returns `None`; entries recorded by someone else are skipped quietly,
/// everything else is logged at warn level.
pub fn accept_entry(
    entry: &LogEntry,
    tag: &str,
    identity: &str,
    trust: &TrustRoots,
) -> Option<(String, Info)> {
    match check_entry(entry, tag, identity, trust) {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!("skipping log entry {}: {e:#}", entry.uuid);
            None
        }
    }
}

fn check_entry(
    entry: &LogEntry,
    tag: &str,
    identity: &str,
    trust: &TrustRoots,
) -> Result<Option<(String, Info)>> {
    // 1. The body must decode to an intoto record with an embedded key.
    let body = entry.record.body.as_deref().context("entry has no body")?;
    let body = STANDARD.decode(body).context("decoding entry body")?;
    let body: IntotoEntryBody = serde_json::from_slice(&body).context("parsing entry body")?;
    let certificate = body
        .spec
        .public_key
        .filter(|pk| !pk.is_empty())
        .context("entry body has no public key")?;
    let certificate = STANDARD
        .decode(certificate)
        .context("decoding entry public key")?;

    // 2. The key field must hold exactly one PEM certificate.
    let leaf_der = single_certificate_der(&certificate)?;

    // 3. It must chain to the issuer roots, as a code-signing certificate,
    //    with the clock pinned to its own NotBefore.
    let (_, leaf) =
        parse_x509_certificate(&leaf_der).map_err(|e| anyhow!("parsing certificate: {e}"))?;
    verify_chain_at_not_before(&leaf, trust)?;

    // 4. It must assert exactly our identity.
    let email = single_email(&leaf)?;
    if email != identity {
        // Entries recorded by other deployments are expected on a shared
        // log; not worth a warning.
        debug!(
            "skipping log entry {}: recorded by {email}, not by us",
            entry.uuid
        );
        return Ok(None);
    }

    // 5. The attestation must bind the tag we asked about.
    let data = entry
        .record
        .attestation
        .as_ref()
        .and_then(|a| a.data.as_deref())
        .context("entry has no attestation data")?;
    let data = STANDARD.decode(data).context("decoding attestation data")?;
    let doc: AttestationDoc = serde_json::from_slice(&data).context("parsing attestation")?;
    if doc.predicate_type != dsse::PREDICATE_TYPE {
        bail!("unsupported predicate type {:?}", doc.predicate_type);
    }
    if doc.predicate.tag != tag {
        bail!(
            "predicate tag {:?} does not match requested tag {tag:?}",
            doc.predicate.tag
        );
    }

    let integrated_time = chrono::DateTime::from_timestamp(entry.record.integrated_time, 0)
        .context("entry has an invalid integrated time")?;
    Ok(Some((
        doc.predicate.digest,
        Info {
            uuid: entry.uuid.clone(),
            log_index: entry.record.log_index,
            integrated_time,
        },
    )))
}

/// Decode a PEM document expected to hold exactly one certificate.
fn single_certificate_der(pem: &[u8]) -> Result<Vec<u8>> {
    let mut certs = Vec::new();
    for item in Pem::iter_from_buffer(pem) {
        let item = item.context("reading embedded certificate PEM")?;
        if item.label == "CERTIFICATE" {
            certs.push(item.contents);
        }
    }
    if certs.len() != 1 {
        bail!("entry embeds {} certificates, want exactly one", certs.len());
    }
    Ok(certs.remove(0))
}

/// Validate the chain leaf -> intermediates -> roots, with every
/// certificate required to be valid at the leaf's NotBefore. Expiry after
/// signing does not invalidate historical entries.
fn verify_chain_at_not_before(leaf: &X509Certificate<'_>, trust: &TrustRoots) -> Result<()> {
    let at = leaf.validity().not_before;

    let eku = leaf
        .extended_key_usage()
        .map_err(|e| anyhow!("reading extended key usage: {e}"))?
        .ok_or_else(|| anyhow!("certificate has no extended key usage"))?;
    if !eku.value.code_signing && !eku.value.any {
        bail!("certificate is not a code-signing certificate");
    }

    let roots = parse_pool(&trust.roots)?;
    let intermediates = parse_pool(&trust.intermediates)?;

    let mut current = leaf;
    for _ in 0..MAX_CHAIN_DEPTH {
        if let Some(root) = roots.iter().find(|c| issued(current, c)) {
            if !root.validity().is_valid_at(at) {
                bail!("issuer root was not valid at signing time");
            }
            return Ok(());
        }
        let next = intermediates
            .iter()
            .find(|c| issued(current, c))
            .ok_or_else(|| anyhow!("certificate does not chain to the issuer roots"))?;
        if !next.validity().is_valid_at(at) {
            bail!("issuer intermediate was not valid at signing time");
        }
        current = next;
    }
    bail!("certificate chain exceeds depth {MAX_CHAIN_DEPTH}");
}

fn parse_pool(pool: &[Vec<u8>]) -> Result<Vec<X509Certificate<'_>>> {
    pool.iter()
        .map(|der| {
            parse_x509_certificate(der)
                .map(|(_, cert)| cert)
                .map_err(|e| anyhow!("parsing issuer trust root: {e}"))
        })
        .collect()
}

fn issued(child: &X509Certificate<'_>, candidate: &X509Certificate<'_>) -> bool {
    child.issuer().as_raw() == candidate.subject().as_raw()
        && child
            .verify_signature(Some(candidate.public_key()))
            .is_ok()
}

/// The single rfc822 identity embedded in the certificate.
fn single_email<'a>(cert: &'a X509Certificate<'_>) -> Result<&'a str> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| anyhow!("reading subject alternative names: {e}"))?
        .ok_or_else(|| anyhow!("certificate has no subject alternative names"))?;
    let emails: Vec<&str> = san
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::RFC822Name(email) => Some(*email),
            _ => None,
        })
        .collect();
    match emails[..] {
        [email] => Ok(email),
        _ => bail!(
            "certificate embeds {} identities, want exactly one",
            emails.len()
        ),
    }
}
