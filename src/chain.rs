//! The delegation-chain resolver and verifier (spec §4.5).
//!
//! Mirrors `n0-computer-rcan`'s `Authorizer::check_invocation_from` proof-chain
//! walk (verify each link, thread the expected next issuer through), extended
//! with revocation, expiry, caveat evaluation, monotonic attenuation, and
//! cycle detection.

use crate::caveat::{self, EvalContext, OpaqueNotice};
use crate::did::DidKeyStore;
use crate::error::{Error, Result};
use crate::model::Capability;
use crate::store::{CapabilityStore, RevokedSet};
use chrono::Utc;
use std::collections::HashSet;

/// Recursion depth beyond which a chain is rejected outright (spec §5).
pub const MAX_CHAIN_DEPTH: usize = 100;

/// Verifies `c` and its entire ancestor chain (spec §4.5), returning the
/// caveats that could not be fully decided by the core (advisory, not a
/// failure — spec §7).
pub fn verify_capability(
    c: &Capability,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store: &CapabilityStore,
) -> Result<Vec<OpaqueNotice>> {
    let mut visited = HashSet::new();
    let (opaque, _root_created) = verify_inner(c, did_keys, revoked, store, &mut visited, 0)?;
    tracing::debug!(capability_id = %c.id, depth = visited.len(), "capability chain verified");
    Ok(opaque)
}

/// Verifies `c` and recurses into its ancestors, additionally returning the
/// root capability's `created` timestamp so the caller can check each
/// proof's timing invariant (spec §3: `proof.created` within
/// `[root.created, expires ?? +inf]`).
fn verify_inner(
    c: &Capability,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store: &CapabilityStore,
    visited: &mut HashSet<String>,
    depth: usize,
) -> Result<(Vec<OpaqueNotice>, chrono::DateTime<Utc>)> {
    if depth > MAX_CHAIN_DEPTH {
        return Err(Error::cap_verify(c.id.clone(), "chain too long"));
    }
    if !visited.insert(c.id.clone()) {
        tracing::warn!(capability_id = %c.id, "cycle detected in delegation chain");
        return Err(Error::cap_verify(c.id.clone(), "cycle detected in delegation chain"));
    }
    if revoked.contains(&c.id) {
        tracing::warn!(capability_id = %c.id, "capability is revoked");
        return Err(Error::cap_verify(c.id.clone(), "revoked"));
    }

    let now = Utc::now();
    if let Some(expires) = c.expires {
        if now > expires {
            return Err(Error::cap_verify(c.id.clone(), "expired"));
        }
    }

    let eval_ctx = EvalContext {
        now,
        action_name: None,
        parameters: None,
        revoked_ids: Some(revoked),
    };
    let mut opaque = caveat::evaluate_all(&c.id, &c.caveats, &eval_ctx)?;

    let parent = match &c.parent_capability {
        None => None,
        Some(parent_id) => Some(
            store
                .get(parent_id)
                .ok_or_else(|| Error::CapabilityNotFound {
                    id: parent_id.clone(),
                })?,
        ),
    };

    let signer_did = match &parent {
        None => c.controller.id.clone(),
        Some(parent) => parent.invoker.id.clone(),
    };
    let signer_key = did_keys
        .get(&signer_did)
        .ok_or_else(|| Error::DidKeyNotFound {
            did: signer_did.clone(),
        })?;
    let proof = c
        .proof
        .as_ref()
        .ok_or_else(|| Error::cap_verify(c.id.clone(), "missing proof"))?;
    let bytes = crate::canonical::canonicalize(&c.to_jsonld_unsigned())?;
    crate::crypto::verify(signer_key, &bytes, &proof.proof_value)
        .map_err(|_| Error::cap_verify(c.id.clone(), "signature does not verify"))?;

    let root_created = match parent {
        None => {
            if signer_did != c.controller.id {
                return Err(Error::cap_verify(
                    c.id.clone(),
                    "root capability must be signed by its controller",
                ));
            }
            c.created
        }
        Some(parent) => {
            let (mut parent_opaque, root_created) =
                verify_inner(parent, did_keys, revoked, store, visited, depth + 1)?;
            opaque.append(&mut parent_opaque);

            for action in &c.actions {
                if !parent.actions.iter().any(|pa| pa.name == action.name) {
                    return Err(Error::cap_verify(
                        c.id.clone(),
                        format!("action '{}' exceeds the parent's grant", action.name),
                    ));
                }
            }

            if let (Some(child_expires), Some(parent_expires)) = (c.expires, parent.expires) {
                if child_expires > parent_expires {
                    return Err(Error::cap_verify(
                        c.id.clone(),
                        "expiry extends beyond the parent's expiry",
                    ));
                }
            }

            if !caveat::parent_caveats_preserved(&parent.caveats, &c.caveats) {
                return Err(Error::cap_verify(
                    c.id.clone(),
                    "does not preserve all of the parent's caveats",
                ));
            }

            root_created
        }
    };

    if proof.created < root_created {
        return Err(Error::cap_verify(
            c.id.clone(),
            "proof predates the root capability's creation",
        ));
    }
    if let Some(expires) = c.expires {
        if proof.created > expires {
            return Err(Error::cap_verify(c.id.clone(), "proof postdates the capability's expiry"));
        }
    }

    Ok((opaque, root_created))
}
