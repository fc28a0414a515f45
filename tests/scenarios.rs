//! Black-box scenarios from spec §8, driven only through the public API.

use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use pretty_assertions::assert_eq;
use rand::rngs::OsRng;
use std::sync::Once;
use testresult::TestResult;
use zcap_engine::{
    cleanup_expired_nonces, create_capability, delegate_capability, invoke_capability,
    verify_capability, verify_invocation, Action, CapabilityStore, Caveat, Did, DidKeyStore,
    Error, Keyring, NonceTimestamps, PartyRef, RevokedSet, Target, UsedNonces,
};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

fn keyring(did: &str) -> Keyring {
    Keyring::new(Did::new(did), SigningKey::generate(&mut OsRng))
}

/// S1: basic invoke. Alice issues `{read}` on `urn:doc:123` to Bob with no
/// expiry; Bob invokes `read` and verification succeeds.
#[test]
fn s1_basic_invoke() -> TestResult {
    init_tracing();
    let alice = keyring("did:key:alice");
    let bob = keyring("did:key:bob");

    let cap = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(bob.did().clone()),
        vec![Action::new("read")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        None,
        None,
    )?;

    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    did_keys.insert(bob.did().clone(), bob.public());
    let revoked = RevokedSet::new();
    let mut store = CapabilityStore::new();
    store.insert(cap.id.clone(), cap.clone());
    let mut used = UsedNonces::new();
    let mut ts = NonceTimestamps::new();

    let invocation = invoke_capability(
        &cap, "read", &bob, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
    )?;

    assert_eq!(invocation.document.capability, cap.id);
    assert!(invocation.opaque_caveats.is_empty());
    verify_invocation(&invocation.document, &did_keys, &revoked, &store)?;
    Ok(())
}

/// S2: delegate + invoke. Alice → Bob `{read, write}`. Bob → Charlie
/// `{read}`, expires in 7 days. Charlie invokes `read` successfully but
/// `write` is rejected.
#[test]
fn s2_delegate_and_invoke() {
    let alice = keyring("did:key:alice");
    let bob = keyring("did:key:bob");
    let charlie = keyring("did:key:charlie");

    let root = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(bob.did().clone()),
        vec![Action::new("read"), Action::new("write")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        None,
        None,
    )
    .unwrap();

    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    did_keys.insert(bob.did().clone(), bob.public());
    did_keys.insert(charlie.did().clone(), charlie.public());
    let revoked = RevokedSet::new();
    let mut store = CapabilityStore::new();
    store.insert(root.id.clone(), root.clone());

    let child = delegate_capability(
        &root,
        &bob,
        PartyRef::ed25519(charlie.did().clone()),
        &did_keys,
        &revoked,
        &store,
        Some(vec![Action::new("read")]),
        Some(Utc::now() + Duration::days(7)),
        None,
    )
    .unwrap();
    store.insert(child.id.clone(), child.clone());

    let mut used = UsedNonces::new();
    let mut ts = NonceTimestamps::new();

    invoke_capability(
        &child, "read", &charlie, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
    )
    .unwrap();

    let err = invoke_capability(
        &child, "write", &charlie, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Invocation { .. }));
}

/// S3: revocation. After S1, revoking Bob's capability blocks both
/// verification and invocation.
#[test]
fn s3_revocation() {
    let alice = keyring("did:key:alice");
    let bob = keyring("did:key:bob");

    let cap = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(bob.did().clone()),
        vec![Action::new("read")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        None,
        None,
    )
    .unwrap();

    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    did_keys.insert(bob.did().clone(), bob.public());
    let mut revoked = RevokedSet::new();
    revoked.insert(cap.id.clone());
    let mut store = CapabilityStore::new();
    store.insert(cap.id.clone(), cap.clone());
    let mut used = UsedNonces::new();
    let mut ts = NonceTimestamps::new();

    assert!(matches!(
        verify_capability(&cap, &did_keys, &revoked, &store).unwrap_err(),
        Error::CapabilityVerification { .. }
    ));
    assert!(matches!(
        invoke_capability(
            &cap, "read", &bob, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
        )
        .unwrap_err(),
        Error::CapabilityVerification { .. }
    ));
}

/// S4: ValidUntil caveat. A capability valid for 12h but expiring in 24h
/// rejects an invocation attempted at the 18h mark.
#[test]
fn s4_valid_until_caveat() {
    let alice = keyring("did:key:alice");
    let bob = keyring("did:key:bob");

    let cap = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(bob.did().clone()),
        vec![Action::new("read")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        Some(Utc::now() + Duration::hours(24)),
        Some(vec![Caveat::ValidUntil {
            date: Utc::now() - Duration::hours(6),
        }]),
    )
    .unwrap();

    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    did_keys.insert(bob.did().clone(), bob.public());
    let revoked = RevokedSet::new();
    let mut store = CapabilityStore::new();
    store.insert(cap.id.clone(), cap.clone());
    let mut used = UsedNonces::new();
    let mut ts = NonceTimestamps::new();

    let err = invoke_capability(
        &cap, "read", &bob, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::CaveatEvaluation { .. }));
}

/// S5: attenuation violation. Bob holds `{read}` from Alice and attempts
/// to delegate a superset `{read, write}` to Charlie.
#[test]
fn s5_attenuation_violation() {
    let alice = keyring("did:key:alice");
    let bob = keyring("did:key:bob");
    let charlie = keyring("did:key:charlie");

    let root = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(bob.did().clone()),
        vec![Action::new("read")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        None,
        None,
    )
    .unwrap();

    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    did_keys.insert(bob.did().clone(), bob.public());
    did_keys.insert(charlie.did().clone(), charlie.public());
    let revoked = RevokedSet::new();
    let mut store = CapabilityStore::new();
    store.insert(root.id.clone(), root.clone());

    let err = delegate_capability(
        &root,
        &bob,
        PartyRef::ed25519(charlie.did().clone()),
        &did_keys,
        &revoked,
        &store,
        Some(vec![Action::new("read"), Action::new("write")]),
        None,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Delegation { .. }));
}

/// S6: replay. Two invocations of the same capability never share a
/// nonce, and a consumer tracking its own seen-nonce set rejects a replay.
#[test]
fn s6_replay() {
    let alice = keyring("did:key:alice");
    let bob = keyring("did:key:bob");

    let cap = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(bob.did().clone()),
        vec![Action::new("read")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        None,
        None,
    )
    .unwrap();

    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    did_keys.insert(bob.did().clone(), bob.public());
    let revoked = RevokedSet::new();
    let mut store = CapabilityStore::new();
    store.insert(cap.id.clone(), cap.clone());
    let mut used = UsedNonces::new();
    let mut ts = NonceTimestamps::new();

    let first = invoke_capability(
        &cap, "read", &bob, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
    )
    .unwrap();
    let second = invoke_capability(
        &cap, "read", &bob, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
    )
    .unwrap();
    assert_ne!(first.document.nonce, second.document.nonce);

    // A consumer with its own seen-nonce store rejects the replayed document.
    let mut consumer_seen = UsedNonces::new();
    verify_invocation(&first.document, &did_keys, &revoked, &store).unwrap();
    assert!(consumer_seen.insert(first.document.nonce.clone()));
    // Replaying the same document a second time: the consumer's own store
    // now already contains the nonce, so it must reject it itself — the
    // core does not track this (spec §4.6 step 5).
    assert!(!consumer_seen.insert(first.document.nonce.clone()));
}

#[test]
fn chain_depth_limit_is_enforced() {
    let alice = keyring("did:key:alice");
    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    let revoked = RevokedSet::new();

    let mut store = CapabilityStore::new();
    let mut current = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(alice.did().clone()),
        vec![Action::new("read")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        None,
        None,
    )
    .unwrap();
    store.insert(current.id.clone(), current.clone());

    for _ in 0..150 {
        let next = delegate_capability(
            &current,
            &alice,
            PartyRef::ed25519(alice.did().clone()),
            &did_keys,
            &revoked,
            &store,
            None,
            None,
            None,
        )
        .unwrap();
        store.insert(next.id.clone(), next.clone());
        current = next;
    }

    let err = verify_capability(&current, &did_keys, &revoked, &store).unwrap_err();
    assert!(matches!(err, Error::CapabilityVerification { .. }));
}

#[test]
fn cleanup_expired_nonces_reclaims_memory() {
    let alice = keyring("did:key:alice");
    let bob = keyring("did:key:bob");

    let cap = create_capability(
        PartyRef::ed25519(alice.did().clone()),
        PartyRef::ed25519(bob.did().clone()),
        vec![Action::new("read")],
        Target::new("urn:doc:123", "Document"),
        &alice,
        None,
        None,
    )
    .unwrap();

    let mut did_keys = DidKeyStore::new();
    did_keys.insert(alice.did().clone(), alice.public());
    did_keys.insert(bob.did().clone(), bob.public());
    let revoked = RevokedSet::new();
    let mut store = CapabilityStore::new();
    store.insert(cap.id.clone(), cap.clone());
    let mut used = UsedNonces::new();
    let mut ts = NonceTimestamps::new();

    let invocation = invoke_capability(
        &cap, "read", &bob, &did_keys, &revoked, &store, &mut used, &mut ts, None, None,
    )
    .unwrap();
    assert!(used.contains(&invocation.document.nonce));

    // A negative max_age guarantees eviction regardless of elapsed time,
    // since `num_seconds()` truncates sub-second gaps to zero.
    cleanup_expired_nonces(&mut used, &mut ts, -1);
    assert!(!used.contains(&invocation.document.nonce));
}
