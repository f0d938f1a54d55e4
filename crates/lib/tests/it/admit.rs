//! Admission protocol tests.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use keyserver::FixedClock;
use keyserver::admit::{AdmitChecker, AdmitError, fingerprint_request, normalize_fingerprint};

use crate::helpers::*;

fn node1_ip() -> IpAddr {
    "10.0.0.1".parse().unwrap()
}

fn node2_ip() -> IpAddr {
    "10.0.0.2".parse().unwrap()
}

fn checker() -> (Arc<FixedClock>, AdmitChecker) {
    let clock = test_clock();
    let allow_list = HashMap::from([
        (node1_ip(), "node1".to_string()),
        (node2_ip(), "node2".to_string()),
    ]);
    let checker = AdmitChecker::new(
        Arc::new(tls_authority(clock.clone())),
        allow_list,
        clock.clone(),
    )
    .unwrap();
    (clock, checker)
}

#[test]
fn test_fingerprint_is_sixteen_words() {
    let fingerprint = fingerprint_request(&fixture("node.csr")).unwrap();
    assert_eq!(fingerprint.split('-').count(), 16);
    assert!(fingerprint.split('-').all(|word| word.len() == 5));
    assert_eq!(normalize_fingerprint(&fingerprint).unwrap(), fingerprint);
    assert_eq!(fingerprint_request(&fixture("node.csr")).unwrap(), fingerprint);
}

#[test]
fn test_tampered_request_is_rejected() {
    let err = fingerprint_request(&tampered_csr()).unwrap_err();
    assert!(matches!(err, AdmitError::InvalidRequest { .. }), "{err}");
    assert!(err.to_string().contains("signature"), "{err}");
}

#[test]
fn test_weak_keys_are_rejected() {
    let err = fingerprint_request(&fixture("weak.csr")).unwrap_err();
    assert!(matches!(err, AdmitError::WeakKey { bits: 1024, .. }), "{err}");
}

#[test]
fn test_unapproved_request_is_refused_then_recorded() {
    let (_clock, checker) = checker();
    let csr = fixture("node.csr");
    let err = checker.admit(&csr, node1_ip()).unwrap_err();
    assert!(err.is_unapproved());

    let fingerprint = fingerprint_request(&csr).unwrap();
    let state = checker.state(&fingerprint).unwrap();
    assert!(state.seen);
    assert_eq!(state.seen_principal.as_deref(), Some("node1"));
    assert!(!state.approved);
}

#[test]
fn test_matching_approval_admits() {
    let (_clock, checker) = checker();
    let csr = fixture("node.csr");
    let fingerprint = fingerprint_request(&csr).unwrap();

    checker.approve(&fingerprint, "node1").unwrap();
    let certificate = checker.admit(&csr, node1_ip()).unwrap();

    let info = inspect_certificate(&certificate);
    assert_eq!(info.common_name, "node1");
    assert_eq!(info.not_after - info.not_before, 40 * 24 * 3600);
    assert!(info.dns_names.is_empty());
    assert!(info.ip_addresses.is_empty());
    assert!(info.client_auth);
    assert!(!info.server_auth);
}

#[test]
fn test_mismatched_principal_is_refused() {
    let (_clock, checker) = checker();
    let csr = fixture("node.csr");
    let fingerprint = fingerprint_request(&csr).unwrap();

    checker.approve(&fingerprint, "node1").unwrap();
    let err = checker.admit(&csr, node2_ip()).unwrap_err();
    assert!(err.is_principal_mismatch());
}

#[test]
fn test_approval_expires_after_five_minutes() {
    let (clock, checker) = checker();
    let csr = fixture("node.csr");
    let fingerprint = fingerprint_request(&csr).unwrap();

    checker.approve(&fingerprint, "node1").unwrap();
    clock.advance_by(Duration::from_secs(4 * 60));
    assert!(checker.admit(&csr, node1_ip()).is_ok());

    clock.advance_by(Duration::from_secs(2 * 60));
    assert!(checker.admit(&csr, node1_ip()).unwrap_err().is_expired());

    checker.approve(&fingerprint, "node1").unwrap();
    assert!(checker.admit(&csr, node1_ip()).is_ok());
}

#[test]
fn test_unknown_source_is_refused() {
    let (_clock, checker) = checker();
    let err = checker
        .admit(&fixture("node.csr"), "192.168.1.1".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, AdmitError::UnknownSource { .. }));
    assert!(checker.is_empty());
}

#[test]
fn test_garbage_request_is_crypto_error() {
    let (_clock, checker) = checker();
    let err = checker.admit("garbage", node1_ip()).unwrap_err();
    assert!(err.is_crypto_error());
}
