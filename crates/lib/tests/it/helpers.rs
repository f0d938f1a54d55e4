use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use keyserver::authority::{Authority, AuthorityKind, load_authority};
use keyserver::config::Config;
use keyserver::{Context, Credentials, FixedClock};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

// ==========================
// FIXTURES
// ==========================

pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Read a fixture file as text.
pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name))
        .unwrap_or_else(|e| panic!("Failed to read fixture {name}: {e}"))
}

/// `node.csr` with the last byte of its signature flipped.
pub fn tampered_csr() -> String {
    let parsed = pem::parse(fixture("node.csr")).expect("Failed to parse CSR fixture");
    let mut der = parsed.contents().to_vec();
    if let Some(last) = der.last_mut() {
        *last ^= 0x01;
    }
    pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", der))
}

pub fn test_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::default())
}

/// The TLS authority backed by `tls_ca.key` / `tls_ca.pem`.
pub fn tls_authority(clock: Arc<FixedClock>) -> Authority {
    load_authority(
        "clustertls",
        AuthorityKind::Tls,
        &fixture_path("tls_ca.key"),
        &fixture_path("tls_ca.pem"),
        clock,
    )
    .expect("Failed to load TLS authority")
}

/// The SSH authority backed by `ssh_ca.key` / `ssh_ca.pub`.
pub fn ssh_authority(clock: Arc<FixedClock>) -> Authority {
    load_authority(
        "ssh-user",
        AuthorityKind::Ssh,
        &fixture_path("ssh_ca.key"),
        &fixture_path("ssh_ca.pub"),
        clock,
    )
    .expect("Failed to load SSH authority")
}

// ==========================
// POLICY
// ==========================

/// A policy exercising every privilege kind. Paths are relative to the
/// fixtures directory.
pub const POLICY: &str = r#"{
    "authentication-authority": "clustertls",
    "admission-authority": "clustertls",
    "static-files": {"ca.pem": "tls_ca.pem"},
    "authorities": [
        {"name": "clustertls", "type": "TLS", "key": "tls_ca.key", "cert": "tls_ca.pem"},
        {"name": "ssh-user", "type": "SSH", "key": "ssh_ca.key", "cert": "ssh_ca.pub"},
        {"name": "service-accounts", "type": "static", "key": "service.key", "cert": "service.pem"}
    ],
    "groups": [
        {"name": "root"},
        {"name": "admins", "subgroup-of": "root"},
        {"name": "nodes", "subgroup-of": "root"},
        {"name": "workers", "subgroup-of": "nodes"}
    ],
    "accounts": [
        {"principal": "admin", "group": "admins"},
        {"principal": "node1", "group": "workers", "limit-ip": true,
         "metadata": {"ip": "10.0.0.1", "hostname": "node1.cluster.local"}},
        {"principal": "node2", "group": "workers",
         "metadata": {"ip": "10.0.0.2", "hostname": "node2.cluster.local"}},
        {"principal": "etcd", "group": "nodes", "disable-direct-auth": true,
         "metadata": {"hostname": "etcd.cluster.local"}}
    ],
    "grants": [
        {"api": "bootstrap", "group": "admins", "privilege": "bootstrap-account",
         "scope": "nodes", "lifespan": "1h"},
        {"api": "access-ssh", "group": "admins", "privilege": "sign-ssh",
         "authority": "ssh-user", "lifespan": "4h",
         "common-name": "temporary-ssh-grant-(principal)", "allowed-names": ["root"]},
        {"api": "impersonate", "group": "admins", "privilege": "impersonate", "scope": "nodes"},
        {"api": "approve", "group": "admins", "privilege": "approve-admission", "scope": "nodes"},
        {"api": "fetch-service-key", "group": "admins", "privilege": "fetch-key",
         "authority": "service-accounts"},
        {"api": "renew-tls", "group": "nodes", "privilege": "sign-tls",
         "authority": "clustertls", "lifespan": "1h", "is-host": "true",
         "common-name": "(principal)", "allowed-names": ["(hostname)", "10.0.0.9"]},
        {"api": "get-config", "group": "nodes", "privilege": "construct-configuration",
         "contents": "hostname=(hostname)"}
    ]
}"#;

/// Parse a policy document whose paths are relative to the fixtures.
pub fn policy(text: &str) -> Config {
    Config::from_json(text, &fixtures_dir()).expect("Failed to parse policy")
}

/// Compile [`POLICY`] against a fixed clock.
pub fn test_context() -> (Arc<FixedClock>, Context) {
    let clock = test_clock();
    let context =
        Context::compile_with_clock(&policy(POLICY), clock.clone()).expect("Failed to compile");
    (clock, context)
}

/// Certificate credentials for `principal`, issued by the authentication
/// authority of `context`.
pub fn certificate_credentials(context: &Context, principal: &str) -> Credentials {
    let certificate = context
        .authority("clustertls")
        .unwrap()
        .sign(
            &fixture("node.csr"),
            false,
            Duration::from_secs(3600),
            principal,
            &[],
        )
        .expect("Failed to issue client certificate");
    Credentials::from_pem_chain(&certificate).unwrap()
}

// ==========================
// CERTIFICATE INSPECTION
// ==========================

/// The parts of an issued certificate tests look at.
#[derive(Debug)]
pub struct CertificateInfo {
    pub serial: Vec<u8>,
    pub not_before: i64,
    pub not_after: i64,
    pub common_name: String,
    pub issuer: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub client_auth: bool,
    pub server_auth: bool,
}

pub fn inspect_certificate(certificate_pem: &str) -> CertificateInfo {
    let parsed = pem::parse(certificate_pem).expect("Failed to parse PEM");
    let (_, cert) = X509Certificate::from_der(parsed.contents()).expect("Failed to parse DER");

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    if let Some(san) = cert.subject_alternative_name().unwrap() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => ip_addresses.push(match bytes.len() {
                    4 => IpAddr::from(<[u8; 4]>::try_from(*bytes).unwrap()),
                    _ => IpAddr::from(<[u8; 16]>::try_from(*bytes).unwrap()),
                }),
                _ => {}
            }
        }
    }
    let (client_auth, server_auth) = match cert.extended_key_usage().unwrap() {
        Some(eku) => (eku.value.client_auth, eku.value.server_auth),
        None => (false, false),
    };

    CertificateInfo {
        serial: cert.raw_serial().to_vec(),
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
        common_name: cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string(),
        issuer: cert.issuer().to_string(),
        dns_names,
        ip_addresses,
        client_auth,
        server_auth,
    }
}
