//! The invocation engine (spec §4.6): produces and consumes signed
//! invocation documents, and manages replay-protection nonces.

use crate::caveat::{self, EvalContext, OpaqueNotice};
use crate::chain;
use crate::did::{DidKeyStore, Keyring};
use crate::error::{Error, Result};
use crate::model::{Action, Capability, InvocationDocument, Proof, ProofPurpose};
use crate::store::{self, CapabilityStore, NonceTimestamps, RevokedSet, UsedNonces};
use chrono::Utc;
use indexmap::IndexMap;
use rand::RngCore;
use serde_json::Value;
use uuid::Uuid;

/// 128 bits, the minimum nonce size the spec requires (§3, §4.6).
const NONCE_BYTES: usize = 16;

/// How many times to retry nonce generation on a collision before giving up
/// (spec §4.6 step 5: "astronomically unlikely, still handled").
const MAX_NONCE_ATTEMPTS: usize = 8;

/// The result of a successful [`invoke_capability`] call.
#[derive(Debug)]
pub struct Invocation {
    pub document: InvocationDocument,
    /// Caveats the core could not fully decide; the caller must enforce
    /// these before acting on the invocation (spec §7).
    pub opaque_caveats: Vec<OpaqueNotice>,
}

/// Produces a signed invocation of `c` for `action_name` (spec §4.6,
/// "Produce"). Mutates `used_nonces` and `nonce_ts` in place; this is the
/// one place in the engine that is not a pure function of its arguments
/// (spec §1, §5).
#[allow(clippy::too_many_arguments)]
pub fn invoke_capability(
    c: &Capability,
    action_name: &str,
    invoker_key: &Keyring,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store_: &CapabilityStore,
    used_nonces: &mut UsedNonces,
    nonce_ts: &mut NonceTimestamps,
    parameters: Option<IndexMap<String, Value>>,
    nonce_max_age_secs: Option<i64>,
) -> Result<Invocation> {
    let mut opaque = chain::verify_capability(c, did_keys, revoked, store_)?;

    if !c.actions.iter().any(|a| a.name == action_name) {
        return Err(Error::invocation(format!(
            "action '{action_name}' is not granted by this capability"
        )));
    }

    let now = Utc::now();
    let parameters = parameters.unwrap_or_default();
    let eval_ctx = EvalContext {
        now,
        action_name: Some(action_name),
        parameters: Some(&parameters),
        revoked_ids: Some(revoked),
    };
    let mut invocation_opaque = caveat::evaluate_all(&c.id, &c.caveats, &eval_ctx)?;
    opaque.append(&mut invocation_opaque);

    let expected_key = did_keys
        .get(&c.invoker.id)
        .ok_or_else(|| Error::DidKeyNotFound {
            did: c.invoker.id.clone(),
        })?;
    if invoker_key.public() != *expected_key {
        return Err(Error::invocation("invoker key does not match the capability's invoker"));
    }

    let nonce = generate_nonce(used_nonces)?;

    let unsigned = InvocationDocument {
        id: format!("urn:uuid:{}", Uuid::new_v4()),
        capability: c.id.clone(),
        action: Action {
            name: action_name.to_string(),
            parameters,
        },
        created: now,
        nonce: nonce.clone(),
        proof: None,
    };
    let bytes = crate::canonical::canonicalize(&unsigned.to_jsonld_unsigned())?;
    let proof_value = crate::crypto::sign(invoker_key.signing_key(), &bytes);
    let document = InvocationDocument {
        proof: Some(Proof {
            created: now,
            verification_method: format!("{}#key-1", invoker_key.did()),
            proof_purpose: ProofPurpose::CapabilityInvocation,
            proof_value,
        }),
        ..unsigned
    };

    used_nonces.insert(nonce.clone());
    nonce_ts.insert(nonce, now);
    let max_age = nonce_max_age_secs.unwrap_or(store::DEFAULT_NONCE_MAX_AGE_SECS);
    store::cleanup_expired_nonces(used_nonces, nonce_ts, max_age);

    tracing::debug!(
        capability_id = %c.id,
        action = %action_name,
        invocation_id = %document.id,
        "invocation produced"
    );

    Ok(Invocation {
        document,
        opaque_caveats: opaque,
    })
}

fn generate_nonce(used: &UsedNonces) -> Result<String> {
    let mut rng = rand::thread_rng();
    for _ in 0..MAX_NONCE_ATTEMPTS {
        let mut buf = [0u8; NONCE_BYTES];
        rng.fill_bytes(&mut buf);
        let nonce = hex::encode(buf);
        if !used.contains(&nonce) {
            return Ok(nonce);
        }
    }
    Err(Error::invocation("exhausted nonce generation attempts"))
}

/// Verifies a previously-produced invocation document against its
/// referenced capability chain (spec §4.6, "Consume"). This never mutates
/// any nonce store — replay protection on the consuming side is the
/// caller's responsibility (spec §4.6 step 5).
pub fn verify_invocation(
    doc: &InvocationDocument,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store_: &CapabilityStore,
) -> Result<Vec<OpaqueNotice>> {
    let capability = store_
        .get(&doc.capability)
        .ok_or_else(|| Error::CapabilityNotFound {
            id: doc.capability.clone(),
        })?;

    let mut opaque = chain::verify_capability(capability, did_keys, revoked, store_)?;

    let signer_key = did_keys
        .get(&capability.invoker.id)
        .ok_or_else(|| Error::DidKeyNotFound {
            did: capability.invoker.id.clone(),
        })?;
    let proof = doc
        .proof
        .as_ref()
        .ok_or_else(|| Error::invocation_verify("invocation document has no proof"))?;
    let bytes = crate::canonical::canonicalize(&doc.to_jsonld_unsigned())?;
    crate::crypto::verify(signer_key, &bytes, &proof.proof_value)
        .map_err(|_| Error::invocation_verify("invocation proof does not verify"))?;

    let now = Utc::now();
    let eval_ctx = EvalContext {
        now,
        action_name: Some(&doc.action.name),
        parameters: Some(&doc.action.parameters),
        revoked_ids: Some(revoked),
    };
    let mut doc_opaque = caveat::evaluate_all(&capability.id, &capability.caveats, &eval_ctx)?;
    opaque.append(&mut doc_opaque);

    tracing::debug!(invocation_id = %doc.id, capability_id = %doc.capability, "invocation verified");
    Ok(opaque)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::{Did, PartyRef};
    use crate::model::Target;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn keyring(did: &str) -> Keyring {
        Keyring::new(Did::new(did), SigningKey::generate(&mut OsRng))
    }

    fn alice_issues_read_to_bob() -> (Keyring, Keyring, Capability, DidKeyStore) {
        let alice = keyring("did:key:alice");
        let bob = keyring("did:key:bob");
        let cap = Capability::create(
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
        (alice, bob, cap, did_keys)
    }

    #[test]
    fn basic_invoke_succeeds() {
        let (_, bob, cap, did_keys) = alice_issues_read_to_bob();
        let store_ = CapabilityStore::new();
        let revoked = RevokedSet::new();
        let mut used = UsedNonces::new();
        let mut ts = NonceTimestamps::new();

        let result = invoke_capability(
            &cap, "read", &bob, &did_keys, &revoked, &store_, &mut used, &mut ts, None, None,
        )
        .unwrap();
        assert_eq!(result.document.capability, cap.id);
        assert!(used.contains(&result.document.nonce));
    }

    #[test]
    fn disallowed_action_is_rejected() {
        let (_, bob, cap, did_keys) = alice_issues_read_to_bob();
        let store_ = CapabilityStore::new();
        let revoked = RevokedSet::new();
        let mut used = UsedNonces::new();
        let mut ts = NonceTimestamps::new();

        let err = invoke_capability(
            &cap, "write", &bob, &did_keys, &revoked, &store_, &mut used, &mut ts, None, None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Invocation { .. }));
    }

    #[test]
    fn wrong_invoker_key_is_rejected() {
        let (_, _bob, cap, did_keys) = alice_issues_read_to_bob();
        let mallory = keyring("did:key:mallory");
        let store_ = CapabilityStore::new();
        let revoked = RevokedSet::new();
        let mut used = UsedNonces::new();
        let mut ts = NonceTimestamps::new();

        let err = invoke_capability(
            &cap, "read", &mallory, &did_keys, &revoked, &store_, &mut used, &mut ts, None, None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DidKeyNotFound { .. }));
    }

    #[test]
    fn successive_invocations_never_repeat_a_nonce() {
        let (_, bob, cap, did_keys) = alice_issues_read_to_bob();
        let store_ = CapabilityStore::new();
        let revoked = RevokedSet::new();
        let mut used = UsedNonces::new();
        let mut ts = NonceTimestamps::new();

        let first = invoke_capability(
            &cap, "read", &bob, &did_keys, &revoked, &store_, &mut used, &mut ts, None, None,
        )
        .unwrap();
        let second = invoke_capability(
            &cap, "read", &bob, &did_keys, &revoked, &store_, &mut used, &mut ts, None, None,
        )
        .unwrap();
        assert_ne!(first.document.nonce, second.document.nonce);
    }

    #[test]
    fn verify_invocation_round_trips() {
        let (_, bob, cap, did_keys) = alice_issues_read_to_bob();
        let mut store_ = CapabilityStore::new();
        store_.insert(cap.id.clone(), cap.clone());
        let revoked = RevokedSet::new();
        let mut used = UsedNonces::new();
        let mut ts = NonceTimestamps::new();

        let produced = invoke_capability(
            &cap, "read", &bob, &did_keys, &revoked, &store_, &mut used, &mut ts, None, None,
        )
        .unwrap();

        verify_invocation(&produced.document, &did_keys, &revoked, &store_).unwrap();
    }

    #[test]
    fn revoking_the_capability_blocks_invocation() {
        let (_, bob, cap, did_keys) = alice_issues_read_to_bob();
        let store_ = CapabilityStore::new();
        let mut revoked = RevokedSet::new();
        revoked.insert(cap.id.clone());
        let mut used = UsedNonces::new();
        let mut ts = NonceTimestamps::new();

        let err = invoke_capability(
            &cap, "read", &bob, &did_keys, &revoked, &store_, &mut used, &mut ts, None, None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CapabilityVerification { .. }));
    }
}
