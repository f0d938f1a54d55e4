//! Bootstrap token lifecycle tests.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keyserver::token::TokenRegistry;

use crate::helpers::*;

#[test]
fn test_token_redeems_exactly_once() {
    let registry = TokenRegistry::new(test_clock());
    let token = registry.grant_token("node1", Duration::from_secs(60));

    assert_eq!(registry.verify(&token).unwrap(), "node1");
    let err = registry.verify(&token).unwrap_err();
    assert!(err.is_not_found() || err.is_already_claimed());
}

#[test]
fn test_expired_token_is_refused() {
    let clock = test_clock();
    let registry = TokenRegistry::new(clock.clone());
    let token = registry.grant_token("node1", Duration::from_secs(60));

    clock.advance_by(Duration::from_secs(61));
    assert!(registry.lookup_token(&token).unwrap().has_expired());
    assert!(registry.verify(&token).unwrap_err().is_expired());
}

#[test]
fn test_expiry_is_monotonic() {
    let clock = test_clock();
    let registry = TokenRegistry::new(clock.clone());
    let token = registry.grant_token("node1", Duration::from_secs(10));
    let scoped = registry.lookup_token(&token).unwrap();

    let mut expired = false;
    for _ in 0..30 {
        clock.advance_by(Duration::from_secs(1));
        let now_expired = scoped.has_expired();
        assert!(!expired || now_expired, "token came back to life");
        expired = now_expired;
    }
    assert!(expired);
}

#[test]
fn test_granting_sweeps_expired_tokens() {
    let clock = test_clock();
    let registry = TokenRegistry::new(clock.clone());
    let stale = registry.grant_token("node1", Duration::from_secs(1));
    clock.advance_by(Duration::from_secs(5));

    registry.grant_token("node2", Duration::from_secs(60));
    assert_eq!(registry.len(), 1);
    assert!(registry.lookup_token(&stale).unwrap_err().is_not_found());
}

#[test]
fn test_unknown_token_is_unrecognized() {
    let registry = TokenRegistry::new(test_clock());
    assert!(registry.verify("00112233").unwrap_err().is_not_found());
}

#[test]
fn test_concurrent_claims_have_one_winner() {
    let registry = TokenRegistry::new(test_clock());
    let token = registry.grant_token("node1", Duration::from_secs(60));
    let scoped = registry.lookup_token(&token).unwrap();

    let winners: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scoped = Arc::clone(&scoped);
                s.spawn(move || scoped.claim().is_ok())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum()
    });
    assert_eq!(winners, 1);
    assert!(scoped.is_claimed());
}
