//! DID identifiers and the caller-supplied DID→public-key map.
//!
//! The engine never resolves a DID itself (see spec §1, OUT OF SCOPE); it
//! only ever looks DIDs up in a map the caller supplies.

use derive_more::Display;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// An opaque Decentralized Identifier.
///
/// Treated as an inert string key into the caller's key store; this crate
/// never parses, validates, or resolves it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wraps a raw DID string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the underlying DID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

impl From<&str> for Did {
    fn from(value: &str) -> Self {
        Did::new(value)
    }
}

impl From<String> for Did {
    fn from(value: String) -> Self {
        Did::new(value)
    }
}

/// The `{id, type}` shape shared by a capability's `controller` and
/// `invoker` fields (spec §3).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct PartyRef {
    /// The party's DID.
    pub id: Did,
    /// Verification key type tag, e.g. `"Ed25519VerificationKey2020"`.
    #[serde(rename = "type")]
    pub key_type: String,
}

impl PartyRef {
    /// The key type tag this crate expects callers to use; recorded but
    /// never enforced by the engine (any tag round-trips through
    /// [`crate::model::Capability::to_jsonld`]/`from_jsonld`).
    pub const ED25519_KEY_TYPE: &'static str = "Ed25519VerificationKey2020";

    /// Builds a party reference with the standard Ed25519 key type tag.
    pub fn ed25519(id: impl Into<Did>) -> Self {
        Self {
            id: id.into(),
            key_type: Self::ED25519_KEY_TYPE.to_string(),
        }
    }
}

/// A signing keypair together with the DID it is addressed by.
///
/// This is the caller-held secret material the spec's `controller_key`,
/// `delegator_key`, and `invoker_key` parameters refer to; the engine never
/// generates or stores these (spec §1, OUT OF SCOPE).
pub struct Keyring {
    did: Did,
    signing_key: ed25519_dalek::SigningKey,
}

impl Keyring {
    /// Pairs a DID with the signing key that backs it.
    pub fn new(did: impl Into<Did>, signing_key: ed25519_dalek::SigningKey) -> Self {
        Self {
            did: did.into(),
            signing_key,
        }
    }

    /// The DID this keyring signs on behalf of.
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// The public half of the signing key.
    pub fn public(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub(crate) fn signing_key(&self) -> &ed25519_dalek::SigningKey {
        &self.signing_key
    }
}

/// Caller-owned, read-only mapping from DID to its current public key
/// (spec §5, §6). The engine only ever reads this.
pub type DidKeyStore = std::collections::HashMap<Did, VerifyingKey>;
