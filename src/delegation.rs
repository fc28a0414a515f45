//! The delegation engine (spec §4.7): attenuates a parent capability into a
//! freshly-signed child.
//!
//! Mirrors `n0-computer-rcan`'s `Rcan::delegating_builder` + `RcanBuilder::sign`
//! pattern (delegate by constructing a new signed token whose issuer is the
//! current holder), generalized to a concrete subset-by-name action check,
//! expiry inheritance, and caveat accumulation.

use crate::caveat::Caveat;
use crate::chain;
use crate::context;
use crate::did::{DidKeyStore, Keyring, PartyRef};
use crate::error::{Error, Result};
use crate::model::{Action, Capability, Proof, ProofPurpose};
use crate::store::{CapabilityStore, RevokedSet};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Constructs and signs an attenuated child of `parent` (spec §4.7).
#[allow(clippy::too_many_arguments)]
pub fn delegate_capability(
    parent: &Capability,
    delegator_key: &Keyring,
    new_invoker: PartyRef,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store: &CapabilityStore,
    actions: Option<Vec<Action>>,
    expires: Option<DateTime<Utc>>,
    extra_caveats: Option<Vec<Caveat>>,
) -> Result<Capability> {
    chain::verify_capability(parent, did_keys, revoked, store)?;

    let expected_key = did_keys
        .get(&parent.invoker.id)
        .ok_or_else(|| Error::DidKeyNotFound {
            did: parent.invoker.id.clone(),
        })?;
    if delegator_key.public() != *expected_key {
        return Err(Error::delegation(
            "delegator is not the parent capability's current invoker",
        ));
    }

    let actions = match actions {
        None => parent.actions.clone(),
        Some(requested) => {
            if requested.is_empty() {
                return Err(Error::delegation("delegated actions must be non-empty"));
            }
            for action in &requested {
                if !parent.actions.iter().any(|pa| pa.name == action.name) {
                    return Err(Error::delegation(format!(
                        "cannot delegate action '{}': not granted by the parent",
                        action.name
                    )));
                }
            }
            requested
        }
    };

    let expires = match (expires, parent.expires) {
        (Some(requested), Some(parent_expires)) if requested > parent_expires => {
            return Err(Error::delegation(
                "requested expiry extends beyond the parent's expiry",
            ))
        }
        (Some(requested), _) => Some(requested),
        (None, inherited) => inherited,
    };

    let mut caveats = parent.caveats.clone();
    for caveat in extra_caveats.unwrap_or_default() {
        match caveats.iter().find(|existing| existing.tag() == caveat.tag()) {
            Some(existing) if *existing == caveat => {}
            Some(_) => {
                return Err(Error::delegation(format!(
                    "caveat '{}' conflicts with one already present on the parent",
                    caveat.tag()
                )))
            }
            None => caveats.push(caveat),
        }
    }

    let unsigned = Capability {
        id: format!("urn:uuid:{}", Uuid::new_v4()),
        context: context::default_context(),
        controller: parent.controller.clone(),
        invoker: new_invoker,
        target: parent.target.clone(),
        actions,
        caveats,
        parent_capability: Some(parent.id.clone()),
        created: Utc::now(),
        expires,
        proof: None,
    };

    let bytes = crate::canonical::canonicalize(&unsigned.to_jsonld_unsigned())?;
    let proof_value = crate::crypto::sign(delegator_key.signing_key(), &bytes);
    let child = Capability {
        proof: Some(Proof {
            created: unsigned.created,
            verification_method: format!("{}#key-1", delegator_key.did()),
            proof_purpose: ProofPurpose::CapabilityDelegation,
            proof_value,
        }),
        ..unsigned
    };

    tracing::debug!(
        parent_id = %parent.id,
        child_id = %child.id,
        new_invoker = %child.invoker.id,
        "capability delegated"
    );
    Ok(child)
}
