// Copyright (c) 2025 The tlogistry Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: a test certificate authority, a Fulcio stand-in that
//! signs whatever key the proxy submits, and a stateful Rekor stand-in.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use hyper::{Body, Request, Response};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509, X509Name, X509NameBuilder};
use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePublicKey;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use tlogistry::config::TlogConfig;
use tlogistry::metadata::MetadataClient;
use tlogistry::proxy::ProxyHandler;
use tlogistry::router::Router;
use tlogistry::tlog::TlogController;

pub const IDENTITY: &str = "proxy@tlogistry-test.iam.gserviceaccount.com";
pub const OTHER_IDENTITY: &str = "other@service.example";

pub const DIGEST_A: &str =
    "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const DIGEST_B: &str =
    "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const DIGEST_C: &str =
    "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

fn ec_private_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn x509_name(cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("O", "tlogistry tests").unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

fn serial() -> Asn1Integer {
    let mut bn = BigNum::new().unwrap();
    bn.rand(63, MsbOption::MAYBE_ZERO, false).unwrap();
    bn.to_asn1_integer().unwrap()
}

/// A root + intermediate CA pair standing in for the issuer.
pub struct TestIssuer {
    pub root: X509,
    pub intermediate: X509,
    intermediate_key: PKey<Private>,
}

impl TestIssuer {
    pub fn new() -> Self {
        let now = now_unix();
        let year = 365 * 24 * 3600;

        let root_key = ec_private_key();
        let root_name = x509_name("tlogistry test root");
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&root_name).unwrap();
        builder.set_issuer_name(&root_name).unwrap();
        builder.set_pubkey(&root_key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(now - year).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(now + year).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().critical().key_cert_sign().build().unwrap())
            .unwrap();
        builder.sign(&root_key, MessageDigest::sha256()).unwrap();
        let root = builder.build();

        let intermediate_key = ec_private_key();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder
            .set_subject_name(&x509_name("tlogistry test intermediate"))
            .unwrap();
        builder.set_issuer_name(root.subject_name()).unwrap();
        builder.set_pubkey(&intermediate_key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(now - year).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(now + year).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().critical().key_cert_sign().build().unwrap())
            .unwrap();
        builder.sign(&root_key, MessageDigest::sha256()).unwrap();
        let intermediate = builder.build();

        Self {
            root,
            intermediate,
            intermediate_key,
        }
    }

    /// The published trust material: intermediate first, root last, as the
    /// issuer's rootCert endpoint serves it.
    pub fn root_chain_pem(&self) -> String {
        let mut pem = String::from_utf8(self.intermediate.to_pem().unwrap()).unwrap();
        pem.push_str(&String::from_utf8(self.root.to_pem().unwrap()).unwrap());
        pem
    }

    /// Issue a leaf for an already-encoded public key.
    pub fn issue_leaf(
        &self,
        spki_der: &[u8],
        emails: &[&str],
        code_signing: bool,
        not_before: i64,
        not_after: i64,
    ) -> X509 {
        let subject_key = PKey::public_key_from_der(spki_der).unwrap();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&x509_name("sigstore-leaf")).unwrap();
        builder
            .set_issuer_name(self.intermediate.subject_name())
            .unwrap();
        builder.set_pubkey(&subject_key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        if code_signing {
            builder
                .append_extension(ExtendedKeyUsage::new().code_signing().build().unwrap())
                .unwrap();
        }
        if !emails.is_empty() {
            let san = {
                let mut san = SubjectAlternativeName::new();
                for email in emails {
                    san.email(email);
                }
                let ctx = builder.x509v3_context(Some(&self.intermediate), None);
                san.build(&ctx).unwrap()
            };
            builder.append_extension(san).unwrap();
        }
        builder
            .sign(&self.intermediate_key, MessageDigest::sha256())
            .unwrap();
        builder.build()
    }

    /// A signing key plus a certificate naming `email`, already expired so
    /// that tests exercise the NotBefore-pinned verification path.
    pub fn expired_signer(&self, email: &str) -> (SigningKey, String) {
        let now = now_unix();
        self.signer_valid_between(email, now - 1200, now - 600)
    }

    pub fn signer_valid_between(
        &self,
        email: &str,
        not_before: i64,
        not_after: i64,
    ) -> (SigningKey, String) {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let spki = key.verifying_key().to_public_key_der().unwrap();
        let leaf = self.issue_leaf(spki.as_bytes(), &[email], true, not_before, not_after);
        let pem = String::from_utf8(leaf.to_pem().unwrap()).unwrap();
        (key, pem)
    }
}

/// Fulcio stand-in: issues a live certificate for whatever public key the
/// request carries, bound to a fixed identity.
pub struct FakeFulcio {
    pub issuer: Arc<TestIssuer>,
    pub email: String,
}

impl Respond for FakeFulcio {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let spki = STANDARD
            .decode(body["publicKey"]["content"].as_str().unwrap())
            .unwrap();
        let now = now_unix();
        let leaf = self
            .issuer
            .issue_leaf(&spki, &[&self.email], true, now - 60, now + 600);

        let mut chain = String::from_utf8(leaf.to_pem().unwrap()).unwrap();
        chain.push_str(&self.issuer.root_chain_pem());
        ResponseTemplate::new(201).set_body_raw(chain, "application/pem-certificate-chain")
    }
}

/// A stored Rekor entry.
#[derive(Clone)]
pub struct StoredEntry {
    pub uuid: String,
    pub hash: String,
    pub record: Value,
}

impl StoredEntry {
    /// The decoded attestation statement.
    pub fn statement(&self) -> Value {
        let data = self.record["attestation"]["data"].as_str().unwrap();
        serde_json::from_slice(&STANDARD.decode(data).unwrap()).unwrap()
    }
}

/// Rekor stand-in: append-only store with index search and entry fetch.
#[derive(Clone, Default)]
pub struct FakeRekor {
    entries: Arc<Mutex<Vec<StoredEntry>>>,
}

impl FakeRekor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate an envelope as the log would: the index hash comes from the
    /// statement's subject digest, the attestation block is the decoded
    /// payload.
    pub fn add_envelope(&self, envelope: &str, leaf_pem: &str) -> String {
        let parsed: Value = serde_json::from_str(envelope).unwrap();
        let payload_b64 = parsed["payload"].as_str().unwrap().to_string();
        let statement: Value =
            serde_json::from_slice(&STANDARD.decode(&payload_b64).unwrap()).unwrap();
        let hash = statement["subject"][0]["digest"]["sha256"]
            .as_str()
            .unwrap()
            .to_string();

        let mut entries = self.entries.lock().unwrap();
        let n = entries.len() as i64;
        let uuid = format!("24296fb24b8ad77a{n:048x}");
        let body = json!({
            "apiVersion": "0.0.1",
            "kind": "intoto",
            "spec": {
                "content": { "envelope": envelope },
                "publicKey": STANDARD.encode(leaf_pem),
            },
        });
        let record = json!({
            "body": STANDARD.encode(body.to_string()),
            "integratedTime": 1_700_000_000 + n,
            "logIndex": 1000 + n,
            "logID": "c0ffee",
            "attestation": { "data": payload_b64 },
        });
        entries.push(StoredEntry {
            uuid: uuid.clone(),
            hash,
            record,
        });
        uuid
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn entries(&self) -> Vec<StoredEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/log/entries"))
            .respond_with(CreateEntry(self.clone()))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/index/retrieve"))
            .respond_with(SearchIndex(self.clone()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v1/log/entries/.+$"))
            .respond_with(GetEntry(self.clone()))
            .mount(server)
            .await;
    }
}

struct CreateEntry(FakeRekor);

impl Respond for CreateEntry {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["kind"], "intoto");
        assert_eq!(body["apiVersion"], "0.0.1");
        let envelope = body["spec"]["content"]["envelope"].as_str().unwrap();
        let leaf_pem = String::from_utf8(
            STANDARD
                .decode(body["spec"]["publicKey"].as_str().unwrap())
                .unwrap(),
        )
        .unwrap();
        let uuid = self.0.add_envelope(envelope, &leaf_pem);
        let entry = self
            .0
            .entries()
            .into_iter()
            .find(|e| e.uuid == uuid)
            .unwrap();
        ResponseTemplate::new(201).set_body_json(entry_response(&entry))
    }
}

struct SearchIndex(FakeRekor);

impl Respond for SearchIndex {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let hash = body["hash"].as_str().unwrap();
        let uuids: Vec<String> = self
            .0
            .entries()
            .into_iter()
            .filter(|e| e.hash == hash)
            .map(|e| e.uuid)
            .collect();
        ResponseTemplate::new(200).set_body_json(uuids)
    }
}

struct GetEntry(FakeRekor);

impl Respond for GetEntry {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let uuid = request.url.path().rsplit('/').next().unwrap().to_string();
        match self.0.entries().into_iter().find(|e| e.uuid == uuid) {
            Some(entry) => ResponseTemplate::new(200).set_body_json(entry_response(&entry)),
            None => ResponseTemplate::new(404),
        }
    }
}

/// The map-of-one-entry shape the log wraps every entry in.
fn entry_response(entry: &StoredEntry) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(entry.uuid.clone(), entry.record.clone());
    Value::Object(map)
}

/// Everything a proxy end-to-end test needs, wired together.
pub struct TestEnv {
    pub issuer: Arc<TestIssuer>,
    pub rekor: FakeRekor,
    pub rekor_server: MockServer,
    pub fulcio_server: MockServer,
    pub metadata_server: MockServer,
    pub upstream: MockServer,
    pub router: Router,
}

impl TestEnv {
    pub async fn new() -> Self {
        let issuer = Arc::new(TestIssuer::new());

        let metadata_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/computeMetadata/v1/instance/service-accounts/default/email",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(IDENTITY))
            .mount(&metadata_server)
            .await;
        Mock::given(method("GET"))
            .and(path(
                "/computeMetadata/v1/instance/service-accounts/default/identity",
            ))
            .and(query_param("audience", "sigstore"))
            .respond_with(ResponseTemplate::new(200).set_body_string("test-identity-token"))
            .mount(&metadata_server)
            .await;

        let fulcio_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/rootCert"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(issuer.root_chain_pem(), "application/pem-certificate-chain"),
            )
            .mount(&fulcio_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/signingCert"))
            .respond_with(FakeFulcio {
                issuer: issuer.clone(),
                email: IDENTITY.to_string(),
            })
            .mount(&fulcio_server)
            .await;

        let rekor = FakeRekor::new();
        let rekor_server = MockServer::start().await;
        rekor.mount(&rekor_server).await;

        let upstream = MockServer::start().await;

        let config = TlogConfig {
            audience: "sigstore".to_string(),
            rekor_url: rekor_server.uri(),
            fulcio_url: fulcio_server.uri(),
            rekor_timeout: std::time::Duration::from_secs(5),
            fulcio_timeout: std::time::Duration::from_secs(5),
        };
        let metadata = MetadataClient::new(&metadata_server.uri());
        let tlog = Arc::new(
            TlogController::new(&config, IDENTITY.to_string(), metadata)
                .await
                .expect("controller construction"),
        );
        let router = Router::new(ProxyHandler::new(tlog).with_upstream_scheme("http"));

        Self {
            issuer,
            rekor,
            rekor_server,
            fulcio_server,
            metadata_server,
            upstream,
            router,
        }
    }

    /// The upstream registry's `host:port`, as it appears in proxied paths.
    pub fn upstream_host(&self) -> String {
        self.upstream
            .uri()
            .trim_start_matches("http://")
            .to_string()
    }

    /// The canonical tag string the proxy will attest for `img:tag`.
    pub fn tag_string(&self, repo: &str, tag: &str) -> String {
        format!("{}/{repo}:{tag}", self.upstream_host())
    }

    /// Serve a GET against the router.
    pub async fn get(&self, path_and_query: &str) -> Response<Body> {
        self.request("GET", path_and_query).await
    }

    pub async fn request(&self, method: &str, path_and_query: &str) -> Response<Body> {
        let req = Request::builder()
            .method(method)
            .uri(path_and_query)
            .body(Body::empty())
            .unwrap();
        self.router.route(req).await
    }

    /// Mount an anonymous upstream: `/v2/` answers 200 and the manifest is
    /// served with the given digest header.
    pub async fn mount_upstream_manifest(&self, repo: &str, target: &str, digest: &str) {
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.upstream)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v2/{repo}/manifests/{target}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Docker-Content-Digest", digest)
                    .set_body_raw(
                        r#"{"schemaVersion":2}"#,
                        "application/vnd.oci.image.manifest.v1+json",
                    ),
            )
            .mount(&self.upstream)
            .await;
    }
}

pub async fn body_string(resp: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
