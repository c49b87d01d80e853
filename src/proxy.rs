// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The proxy handler: classify, look up, fetch, check, record, stream.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::SecondsFormat;
use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION};
use hyper::{Body, Method, Request, Response};
use log::{debug, warn};

use crate::auth::AuthAgent;
use crate::error::{RegistryError, Result};
use crate::reference::{ParsedRequest, RequestKind};
use crate::tlog::{Info, TlogController};

pub const HEADER_DIGEST: &str = "docker-content-digest";
pub const HEADER_UUID: &str = "tlog-uuid";
pub const HEADER_LOG_INDEX: &str = "tlog-logindex";
pub const HEADER_INTEGRATED_TIME: &str = "tlog-integratedtime";
pub const HEADER_FIRST_SEEN: &str = "tlog-first-seen";

pub struct ProxyHandler {
    tlog: Arc<TlogController>,
    auth: AuthAgent,
    client: reqwest::Client,
    scheme: &'static str,
}

impl ProxyHandler {
    pub fn new(tlog: Arc<TlogController>) -> Self {
        // Redirects pass through to the client verbatim; blob pulls in
        // particular rely on following the storage redirect themselves.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("default TLS backend is available");
        Self {
            tlog,
            auth: AuthAgent::new(),
            client,
            scheme: "https",
        }
    }

    /// Use plain HTTP towards upstreams. Only integration tests against
    /// local mock registries want this.
    pub fn with_upstream_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = scheme;
        self
    }

    /// Serve one `/v2/<repo>/<kind>/<ref>` request.
    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>> {
        let parsed = ParsedRequest::parse(req.uri().path())
            .map_err(|e| RegistryError::NameInvalid(format!("{e:#}")))?;
        let is_tag_manifest = parsed.is_tag_manifest();

        // Manifest-by-tag requests consult the log before anything else;
        // a lookup failure means we cannot enforce the pin, so we refuse.
        let (want_digest, mut info): (Option<String>, Option<Info>) = if is_tag_manifest {
            let tag = parsed.tag_string();
            match self.tlog.lookup_binding(&tag).await? {
                Some((digest, info)) => {
                    debug!("log pins {tag} to {digest}");
                    (Some(digest), Some(info))
                }
                None => (None, None),
            }
        } else {
            (None, None)
        };

        let url = parsed.upstream_url(self.scheme);
        debug!("--> {} {url}", req.method());
        let mut upstream_headers = reqwest::header::HeaderMap::new();
        for (name, value) in req.headers() {
            if is_hop_by_hop(name) {
                continue;
            }
            upstream_headers.append(name.clone(), value.clone());
            let shown = if name == AUTHORIZATION {
                "REDACTED"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            debug!("--> {name}: {shown}");
        }

        // Clients almost never arrive with upstream credentials of their
        // own; fetch an anonymous pull token when they don't.
        if !upstream_headers.contains_key(AUTHORIZATION) {
            if let Some(token) = self.auth.token_for(self.scheme, &parsed.reference).await? {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| anyhow!("encoding authorization header: {e}"))?;
                upstream_headers.insert(AUTHORIZATION, value);
            }
        }

        let upstream = self
            .client
            .request(req.method().clone(), &url)
            .headers(upstream_headers)
            .send()
            .await
            .map_err(|e| anyhow!("fetching {url}: {e}"))?;

        let got_digest = upstream
            .headers()
            .get(HEADER_DIGEST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        // The consistency rule. The upstream body is not forwarded on a
        // mismatch; the client gets the two digests instead.
        if let Some(want) = &want_digest {
            if &got_digest != want {
                let tag = parsed.tag_string();
                warn!("digest mismatch for {tag}: log has {want}, upstream sent {got_digest:?}");
                return Err(RegistryError::TagInvalid {
                    tag,
                    want: want.clone(),
                    got: got_digest,
                });
            }
        }

        debug!("<-- {}", upstream.status());
        let mut response = Response::new(Body::empty());
        *response.status_mut() = upstream.status();
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name) {
                continue;
            }
            response.headers_mut().append(name.clone(), value.clone());
        }

        // First sighting: record the binding before answering. Failures are
        // logged and swallowed; the tag will be recorded on a later request.
        if is_tag_manifest && !got_digest.is_empty() && want_digest.is_none() {
            let tag = parsed.tag_string();
            match self.tlog.record_binding(&tag, &got_digest).await {
                Ok(recorded) => {
                    response
                        .headers_mut()
                        .insert(HEADER_FIRST_SEEN, HeaderValue::from_static("true"));
                    info = Some(recorded);
                }
                Err(e) => warn!("recording binding for {tag}: {e:#}"),
            }
        }

        if let Some(info) = &info {
            set_provenance_headers(response.headers_mut(), info)?;
        }

        // Blob bodies are never proxied: the client follows the upstream's
        // storage redirect on its own.
        if parsed.kind != RequestKind::Blobs && req.method() != Method::HEAD {
            *response.body_mut() = Body::wrap_stream(upstream.bytes_stream());
        }
        Ok(response)
    }
}

fn set_provenance_headers(headers: &mut hyper::HeaderMap, info: &Info) -> Result<()> {
    let uuid =
        HeaderValue::from_str(&info.uuid).map_err(|e| anyhow!("encoding entry uuid: {e}"))?;
    headers.insert(HEADER_UUID, uuid);
    headers.insert(
        HEADER_LOG_INDEX,
        HeaderValue::from_str(&info.log_index.to_string())
            .map_err(|e| anyhow!("encoding log index: {e}"))?,
    );
    headers.insert(
        HEADER_INTEGRATED_TIME,
        HeaderValue::from_str(
            &info
                .integrated_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .map_err(|e| anyhow!("encoding integrated time: {e}"))?,
    );
    Ok(())
}

/// Connection-level headers stay on their own hop. `Host` is rewritten by
/// the upstream client, and the transfer encoding is whatever each hop
/// negotiates.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
