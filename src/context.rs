//! The fixed whitelist of JSON-LD context IRIs this crate understands.
//!
//! Remote context loading is disabled entirely (spec §1, NON-GOALS): any
//! context IRI outside this table makes canonicalization fail rather than
//! fetch anything over the network.

/// The security vocabulary context every capability must include.
pub const SECURITY_V2: &str = "https://w3id.org/security/v2";

/// The ZCAP vocabulary context every capability must include.
pub const ZCAP_V1: &str = "https://w3id.org/zcap/v1";

/// The context sequence every capability and invocation document carries.
pub fn default_context() -> Vec<String> {
    vec![SECURITY_V2.to_string(), ZCAP_V1.to_string()]
}

/// Whether `iri` is one of the embedded, recognized contexts.
pub fn is_known(iri: &str) -> bool {
    iri == SECURITY_V2 || iri == ZCAP_V1
}

/// Checks that every entry of `contexts` is recognized, failing closed on
/// the first unknown one.
pub fn validate(contexts: &[String]) -> crate::error::Result<()> {
    for iri in contexts {
        if !is_known(iri) {
            return Err(crate::error::Error::canonicalization(format!(
                "unrecognized context IRI: {iri}"
            )));
        }
    }
    Ok(())
}
