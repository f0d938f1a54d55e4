//! Batched dispatch, impersonation and the privilege kinds end to end.

use keyserver::Request;
use keyserver::admit::fingerprint_request;
use ssh_key::Certificate;

use crate::helpers::*;

fn request(api: &str, body: &str) -> Request {
    Request::new(api, body)
}

#[test]
fn test_batch_results_align_with_requests() {
    let (_clock, context) = test_context();
    let admin = certificate_credentials(&context, "admin");
    let results = context
        .handle_request(
            &admin,
            &[
                request("fetch-service-key", ""),
                request("access-ssh", &fixture("user_ssh.pub")),
                request("bootstrap", "node1"),
            ],
        )
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0], fixture("service.key"));
    let certificate = Certificate::from_openssh(&results[1]).unwrap();
    assert_eq!(certificate.key_id(), "temporary-ssh-grant-admin");
    assert_eq!(certificate.valid_principals(), ["root"]);
    assert_eq!(results[2].len(), 32);
}

#[test]
fn test_unknown_api_is_forbidden() {
    let (_clock, context) = test_context();
    let admin = certificate_credentials(&context, "admin");
    let err = context
        .handle_request(&admin, &[request("renew-tls", &fixture("node.csr"))])
        .unwrap_err();
    assert!(err.is_forbidden());
    assert!(err.to_string().contains("renew-tls"));
}

#[test]
fn test_failure_aborts_the_batch() {
    let (_clock, context) = test_context();
    let admin = certificate_credentials(&context, "admin");
    let err = context
        .handle_request(
            &admin,
            &[request("bootstrap", "node1"), request("no-such-api", "")],
        )
        .unwrap_err();
    assert!(err.is_forbidden());
}

#[test]
fn test_impersonation_switches_account_for_rest_of_batch() {
    let (_clock, context) = test_context();
    let admin = certificate_credentials(&context, "admin");
    let results = context
        .handle_request(
            &admin,
            &[request("impersonate", "node2"), request("get-config", "")],
        )
        .unwrap();
    assert_eq!(results, ["", "hostname=node2.cluster.local"]);

    let err = context
        .handle_request(
            &admin,
            &[request("impersonate", "node2"), request("bootstrap", "node1")],
        )
        .unwrap_err();
    assert!(err.is_forbidden());
}

#[test]
fn test_impersonation_reaches_accounts_without_direct_auth() {
    let (_clock, context) = test_context();
    let admin = certificate_credentials(&context, "admin");
    let results = context
        .handle_request(
            &admin,
            &[
                request("impersonate", "etcd"),
                request("renew-tls", &fixture("node.csr")),
            ],
        )
        .unwrap();

    let info = inspect_certificate(&results[1]);
    assert_eq!(info.common_name, "etcd");
    assert_eq!(info.dns_names, ["etcd.cluster.local"]);
    assert_eq!(info.ip_addresses, ["10.0.0.9".parse::<std::net::IpAddr>().unwrap()]);
    assert!(info.server_auth);
    assert_eq!(info.not_after - info.not_before, 3600);
}

#[test]
fn test_impersonation_outside_scope_is_forbidden() {
    let (_clock, context) = test_context();
    let admin = certificate_credentials(&context, "admin");
    let err = context
        .handle_request(&admin, &[request("impersonate", "admin")])
        .unwrap_err();
    assert!(err.is_forbidden());
}

#[test]
fn test_bootstrap_outside_scope_is_forbidden() {
    let (_clock, context) = test_context();
    let admin = certificate_credentials(&context, "admin");
    let err = context
        .handle_request(&admin, &[request("bootstrap", "admin")])
        .unwrap_err();
    assert!(err.is_forbidden());
    assert!(context.tokens().is_empty());
}

#[test]
fn test_node_renews_its_own_certificate() {
    let (_clock, context) = test_context();
    let node = certificate_credentials(&context, "node2");
    let results = context
        .handle_request(&node, &[request("renew-tls", &fixture("node.csr"))])
        .unwrap();
    let info = inspect_certificate(&results[0]);
    assert_eq!(info.common_name, "node2");
    assert_eq!(info.dns_names, ["node2.cluster.local"]);
}

#[test]
fn test_body_must_be_empty_where_unused() {
    let (_clock, context) = test_context();
    let node = certificate_credentials(&context, "node2");
    let err = context
        .handle_request(&node, &[request("get-config", "unexpected")])
        .unwrap_err();
    assert!(err.to_string().contains("body must be empty"));
}

#[test]
fn test_approval_unlocks_admission() {
    let (_clock, context) = test_context();
    let csr = fixture("node.csr");
    let source = "10.0.0.1".parse().unwrap();

    let err = context.admit(&csr, source).unwrap_err();
    assert!(!err.is_expired());

    let fingerprint = fingerprint_request(&csr).unwrap();
    let admin = certificate_credentials(&context, "admin");
    let body = serde_json::json!({
        "fingerprint": fingerprint.to_uppercase(),
        "principal": "node1",
    })
    .to_string();
    let results = context
        .handle_request(&admin, &[request("approve", &body)])
        .unwrap();
    assert_eq!(results[0], fingerprint);

    let certificate = context.admit(&csr, source).unwrap();
    assert_eq!(inspect_certificate(&certificate).common_name, "node1");
}

#[test]
fn test_approval_outside_scope_is_forbidden() {
    let (_clock, context) = test_context();
    let fingerprint = fingerprint_request(&fixture("node.csr")).unwrap();
    let admin = certificate_credentials(&context, "admin");
    let body = serde_json::json!({"fingerprint": fingerprint, "principal": "admin"}).to_string();
    let err = context
        .handle_request(&admin, &[request("approve", &body)])
        .unwrap_err();
    assert!(err.is_forbidden());
}

#[test]
fn test_public_keys_are_served_by_name() {
    let (_clock, context) = test_context();
    assert_eq!(
        context.public_key("ssh-user").unwrap(),
        fixture("ssh_ca.pub").trim().as_bytes()
    );
    assert_eq!(
        context.public_key("clustertls").unwrap(),
        fixture("tls_ca.pem").as_bytes()
    );
    assert!(context.public_key("nowhere").unwrap_err().is_not_found());
}

#[test]
fn test_requests_parse_from_json() {
    let requests: Vec<Request> =
        serde_json::from_str(r#"[{"api": "a", "body": "x"}, {"api": "b"}]"#).unwrap();
    assert_eq!(requests, [request("a", "x"), request("b", "")]);
}
