//! Loading and compiling policy documents from disk.

use std::fs;

use keyserver::Context;
use keyserver::config::{Config, ConfigError};
use tempfile::TempDir;

use crate::helpers::*;

/// Write `document` as `keyserver.json` into a fresh directory holding copies
/// of the TLS fixtures.
fn policy_dir(document: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in ["tls_ca.key", "tls_ca.pem"] {
        fs::copy(fixture_path(name), dir.path().join(name)).unwrap();
    }
    fs::write(dir.path().join("keyserver.json"), document).unwrap();
    dir
}

const MINIMAL: &str = r#"{
    "authentication-authority": "clustertls",
    "static-files": {"motd": "motd.txt"},
    "authorities": [
        {"name": "clustertls", "type": "TLS", "key": "tls_ca.key", "cert": "tls_ca.pem"}
    ],
    "groups": [{"name": "root"}],
    "accounts": [{"principal": "admin", "group": "root"}]
}"#;

#[test]
fn test_load_resolves_paths_against_document_directory() {
    let dir = policy_dir(MINIMAL);
    fs::write(dir.path().join("motd.txt"), b"welcome").unwrap();

    let config = Config::load(dir.path().join("keyserver.json")).unwrap();
    assert_eq!(
        config.authority("clustertls").unwrap().key,
        dir.path().join("tls_ca.key")
    );

    let context = Context::compile_with_clock(&config, test_clock()).unwrap();
    assert_eq!(context.static_file("motd").unwrap(), b"welcome");
    assert!(context.static_file("other").unwrap_err().is_not_found());
    assert_eq!(context.static_file_names().collect::<Vec<_>>(), ["motd"]);
}

#[test]
fn test_missing_static_file_fails_compilation() {
    let dir = policy_dir(MINIMAL);
    let config = Config::load(dir.path().join("keyserver.json")).unwrap();
    let err = Context::compile_with_clock(&config, test_clock()).unwrap_err();
    assert!(err.is_io_error());
    assert!(err.is_configuration_error());
}

#[test]
fn test_malformed_document_reports_path() {
    let dir = policy_dir("{ not json");
    let err = Config::load(dir.path().join("keyserver.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("keyserver.json"));
}

#[test]
fn test_duplicate_authority_is_rejected() {
    let err = Context::compile_with_clock(
        &policy(
            r#"{
                "authentication-authority": "clustertls",
                "authorities": [
                    {"name": "clustertls", "type": "TLS", "key": "tls_ca.key", "cert": "tls_ca.pem"},
                    {"name": "clustertls", "type": "TLS", "key": "tls_ca.key", "cert": "tls_ca.pem"}
                ]
            }"#,
        ),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("Duplicate authority"));
}

#[test]
fn test_authentication_authority_must_be_tls() {
    let err = Context::compile_with_clock(
        &policy(
            r#"{
                "authentication-authority": "ssh-user",
                "authorities": [
                    {"name": "ssh-user", "type": "SSH", "key": "ssh_ca.key", "cert": "ssh_ca.pub"}
                ]
            }"#,
        ),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("TLS"));

    let err = Context::compile_with_clock(
        &policy(r#"{"authentication-authority": "nowhere"}"#),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_admission_addresses_must_be_unique() {
    let err = Context::compile_with_clock(
        &policy(
            r#"{
                "authentication-authority": "clustertls",
                "admission-authority": "clustertls",
                "authorities": [
                    {"name": "clustertls", "type": "TLS", "key": "tls_ca.key", "cert": "tls_ca.pem"}
                ],
                "groups": [{"name": "root"}],
                "accounts": [
                    {"principal": "a", "group": "root", "metadata": {"ip": "10.0.0.1"}},
                    {"principal": "b", "group": "root", "metadata": {"ip": "10.0.0.1"}}
                ]
            }"#,
        ),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("already bound"));
}

#[test]
fn test_server_tls_margin_must_fit_lifespan() {
    let err = Context::compile_with_clock(
        &policy(
            r#"{
                "authentication-authority": "clustertls",
                "server-tls": {"authority": "clustertls", "principal": "keyserver",
                               "lifespan": "1h", "renew-margin": "2h"},
                "authorities": [
                    {"name": "clustertls", "type": "TLS", "key": "tls_ca.key", "cert": "tls_ca.pem"}
                ]
            }"#,
        ),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("renew-margin"));
}

#[test]
fn test_server_tls_issues_from_context() {
    let context = Context::compile_with_clock(
        &policy(
            r#"{
                "authentication-authority": "clustertls",
                "server-tls": {"authority": "clustertls", "principal": "keyserver",
                               "names": ["keyserver.cluster.local"],
                               "lifespan": "24h", "renew-margin": "1h"},
                "authorities": [
                    {"name": "clustertls", "type": "TLS", "key": "tls_ca.key", "cert": "tls_ca.pem"}
                ]
            }"#,
        ),
        test_clock(),
    )
    .unwrap();
    let server = context.server_certificate().unwrap();
    let info = inspect_certificate(&server.certificate_chain_pem);
    assert_eq!(info.common_name, "keyserver");
    assert_eq!(info.dns_names, ["keyserver.cluster.local"]);
}
