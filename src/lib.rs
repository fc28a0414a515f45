//! A stateless engine for ZCAP-LD (Authorization Capabilities for Linked
//! Data): creating, delegating, invoking, and verifying cryptographically
//! signed authorization capabilities expressed as JSON-LD documents.
//!
//! The engine is a pure-function library over caller-owned state — DID key
//! resolution, capability storage, revocation, and replay-protection nonces
//! all live in containers the caller constructs and passes in (see
//! [`store`]). The sole exception is [`invoke_capability`], which mutates
//! the caller's nonce containers in place to record the invocation it just
//! produced.
//!
//! ```
//! use ed25519_dalek::SigningKey;
//! use zcap_engine::{
//!     create_capability, verify_capability, Action, Did, DidKeyStore, Keyring, PartyRef, Target,
//! };
//!
//! let mut rng = rand::rngs::OsRng;
//! let alice_signing = SigningKey::generate(&mut rng);
//! let alice = Keyring::new(Did::new("did:key:alice"), alice_signing);
//!
//! let capability = create_capability(
//!     PartyRef::ed25519(alice.did().clone()),
//!     PartyRef::ed25519(Did::new("did:key:bob")),
//!     vec![Action::new("read")],
//!     Target::new("urn:doc:123", "Document"),
//!     &alice,
//!     None,
//!     None,
//! )
//! .unwrap();
//!
//! let mut did_keys = DidKeyStore::new();
//! did_keys.insert(alice.did().clone(), alice.public());
//!
//! verify_capability(&capability, &did_keys, &Default::default(), &Default::default()).unwrap();
//! ```

mod canonical;
mod caveat;
mod chain;
mod context;
mod crypto;
mod delegation;
mod did;
mod error;
mod invocation;
mod model;
mod store;

pub use caveat::{evaluate_caveat, Caveat, EvalContext, OpaqueNotice, Outcome};
pub use context::{SECURITY_V2, ZCAP_V1};
pub use did::{Did, DidKeyStore, Keyring, PartyRef};
pub use error::{Error, Result};
pub use model::{Action, Capability, InvocationDocument, Proof, ProofPurpose, Target};
pub use store::{
    cleanup_expired_nonces, CapabilityStore, NonceTimestamps, RevokedSet, UsedNonces,
    DEFAULT_NONCE_MAX_AGE_SECS,
};

/// Creates and signs a new root capability (spec §6).
pub fn create_capability(
    controller: PartyRef,
    invoker: PartyRef,
    actions: Vec<Action>,
    target: Target,
    controller_key: &Keyring,
    expires: Option<chrono::DateTime<chrono::Utc>>,
    caveats: Option<Vec<Caveat>>,
) -> Result<Capability> {
    Capability::create(controller, invoker, actions, target, controller_key, expires, caveats)
}

/// Constructs and signs an attenuated delegation of `parent` (spec §6, §4.7).
#[allow(clippy::too_many_arguments)]
pub fn delegate_capability(
    parent: &Capability,
    delegator_key: &Keyring,
    new_invoker: PartyRef,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store: &CapabilityStore,
    actions: Option<Vec<Action>>,
    expires: Option<chrono::DateTime<chrono::Utc>>,
    caveats: Option<Vec<Caveat>>,
) -> Result<Capability> {
    delegation::delegate_capability(
        parent,
        delegator_key,
        new_invoker,
        did_keys,
        revoked,
        store,
        actions,
        expires,
        caveats,
    )
}

/// Produces a signed invocation of `c`, mutating `used_nonces`/`nonce_ts`
/// in place (spec §6, §4.6).
#[allow(clippy::too_many_arguments)]
pub fn invoke_capability(
    c: &Capability,
    action_name: &str,
    invoker_key: &Keyring,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store: &CapabilityStore,
    used_nonces: &mut UsedNonces,
    nonce_ts: &mut NonceTimestamps,
    parameters: Option<indexmap::IndexMap<String, serde_json::Value>>,
    nonce_max_age_secs: Option<i64>,
) -> Result<invocation::Invocation> {
    invocation::invoke_capability(
        c,
        action_name,
        invoker_key,
        did_keys,
        revoked,
        store,
        used_nonces,
        nonce_ts,
        parameters,
        nonce_max_age_secs,
    )
}

/// Verifies a capability and its entire ancestor chain (spec §6, §4.5).
pub fn verify_capability(
    c: &Capability,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store: &CapabilityStore,
) -> Result<Vec<OpaqueNotice>> {
    chain::verify_capability(c, did_keys, revoked, store)
}

/// Verifies a previously-produced invocation document (spec §6, §4.6).
pub fn verify_invocation(
    doc: &InvocationDocument,
    did_keys: &DidKeyStore,
    revoked: &RevokedSet,
    store: &CapabilityStore,
) -> Result<Vec<OpaqueNotice>> {
    invocation::verify_invocation(doc, did_keys, revoked, store)
}

pub use invocation::Invocation;
