//! The error taxonomy shared by every operation in this crate.
//!
//! Every fallible entry point returns [`Error`]; there is deliberately no
//! catch-all `anyhow`-style variant because callers are expected to match on
//! the specific kind of failure (for example: retry after refreshing a DID
//! key, but never retry a revoked capability).

use crate::did::Did;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while creating, delegating, invoking, or
/// verifying a capability.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A signature failed to decode or did not verify against the claimed key.
    #[error("signature verification failed: {reason}")]
    SignatureVerification {
        /// What went wrong: bad encoding, wrong length, or cryptographic mismatch.
        reason: String,
    },

    /// A caveat was unsatisfied, unknown, or structurally malformed.
    #[error("caveat evaluation failed: {reason}")]
    CaveatEvaluation {
        /// Tag of the caveat that failed, when known.
        tag: Option<String>,
        /// Human readable reason.
        reason: String,
    },

    /// A capability failed chain verification: revoked, expired, a broken
    /// attenuation rule, a cycle, or an overlong chain.
    #[error("capability {id} failed verification: {reason}")]
    CapabilityVerification {
        /// The id of the capability that failed.
        id: String,
        /// Human readable reason.
        reason: String,
    },

    /// An invocation document was malformed, or its proof is inconsistent
    /// with the capability it references.
    #[error("invocation verification failed: {reason}")]
    InvocationVerification {
        /// Human readable reason.
        reason: String,
    },

    /// A delegation request violated the delegation rules (not the current
    /// invoker, requested a superset of actions, or extended the expiry).
    #[error("delegation rejected: {reason}")]
    Delegation {
        /// Human readable reason.
        reason: String,
    },

    /// An invocation request was rejected before signing: disallowed action,
    /// invoker key mismatch, or nonce space exhaustion.
    #[error("invocation rejected: {reason}")]
    Invocation {
        /// Human readable reason.
        reason: String,
    },

    /// A DID required to resolve a signer was not present in the caller's
    /// key store.
    #[error("no key on file for DID {did}")]
    DidKeyNotFound {
        /// The DID that could not be resolved.
        did: Did,
    },

    /// A capability referenced as a parent was not present in the caller's
    /// capability store.
    #[error("capability {id} not found in store")]
    CapabilityNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The document could not be canonicalized: an unrecognized context, or
    /// a structurally invalid document.
    #[error("canonicalization failed: {reason}")]
    Canonicalization {
        /// Human readable reason.
        reason: String,
    },

    /// A JSON-LD document did not parse into a well-formed capability or
    /// invocation: a required field was missing or had the wrong shape.
    #[error("validation failed: {reason}")]
    Validation {
        /// Human readable reason.
        reason: String,
    },
}

impl Error {
    pub(crate) fn sig(reason: impl Into<String>) -> Self {
        Error::SignatureVerification {
            reason: reason.into(),
        }
    }

    pub(crate) fn caveat(tag: Option<impl Into<String>>, reason: impl Into<String>) -> Self {
        Error::CaveatEvaluation {
            tag: tag.map(Into::into),
            reason: reason.into(),
        }
    }

    pub(crate) fn cap_verify(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CapabilityVerification {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invocation_verify(reason: impl Into<String>) -> Self {
        Error::InvocationVerification {
            reason: reason.into(),
        }
    }

    pub(crate) fn delegation(reason: impl Into<String>) -> Self {
        Error::Delegation {
            reason: reason.into(),
        }
    }

    pub(crate) fn invocation(reason: impl Into<String>) -> Self {
        Error::Invocation {
            reason: reason.into(),
        }
    }

    pub(crate) fn canonicalization(reason: impl Into<String>) -> Self {
        Error::Canonicalization {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Error::Validation {
            reason: reason.into(),
        }
    }
}
