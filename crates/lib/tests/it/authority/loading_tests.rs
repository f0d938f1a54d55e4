//! Loading authorities from key and certificate files.

use keyserver::authority::{Authority, AuthorityKind, load_authority};

use crate::helpers::*;

#[test]
fn test_tls_authority_loads_matching_pair() {
    let authority = tls_authority(test_clock());
    assert_eq!(authority.name(), "clustertls");
    assert_eq!(authority.kind(), AuthorityKind::Tls);
    assert_eq!(authority.public_key(), fixture("tls_ca.pem").as_bytes());
}

#[test]
fn test_tls_authority_rejects_mismatched_certificate() {
    let err = load_authority(
        "clustertls",
        AuthorityKind::Tls,
        &fixture_path("tls_ca.key"),
        &fixture_path("other_ca.pem"),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.is_load_error());
}

#[test]
fn test_ssh_authority_rejects_mismatched_public_key() {
    let err = load_authority(
        "ssh-user",
        AuthorityKind::Ssh,
        &fixture_path("ssh_ca.key"),
        &fixture_path("user_ssh.pub"),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.is_load_error());
}

#[test]
fn test_tls_authority_rejects_garbage_key() {
    let err = load_authority(
        "clustertls",
        AuthorityKind::Tls,
        &fixture_path("tls_ca.pem"),
        &fixture_path("tls_ca.pem"),
        test_clock(),
    )
    .unwrap_err();
    assert!(err.is_load_error());
}

#[test]
fn test_tls_authority_equality_is_certificate_equality() {
    let clock = test_clock();
    let a = tls_authority(clock.clone());
    let b = tls_authority(clock);
    assert_eq!(a.as_tls().unwrap(), b.as_tls().unwrap());
}

#[test]
fn test_static_authority_serves_raw_files() {
    let authority = load_authority(
        "service-accounts",
        AuthorityKind::Static,
        &fixture_path("service.key"),
        &fixture_path("service.pem"),
        test_clock(),
    )
    .unwrap();
    assert!(matches!(authority, Authority::Static(_)));
    assert_eq!(authority.public_key(), fixture("service.pem").as_bytes());
    assert_eq!(
        authority.key_material().unwrap(),
        fixture("service.key").as_bytes()
    );
}
