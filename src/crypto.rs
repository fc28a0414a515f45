//! Ed25519 signing and multibase-encoded signature verification (spec §4.2).

use crate::error::{Error, Result};
use ed25519_dalek::{ed25519::signature::Signer, Signature, SigningKey, VerifyingKey};

/// Multibase prefix for base58-btc, per the Multibase spec.
const MULTIBASE_BASE58BTC_PREFIX: char = 'z';

/// Signs `message` with `key`, returning a `z`-prefixed base58btc-encoded
/// 64-byte Ed25519 signature.
pub fn sign(key: &SigningKey, message: &[u8]) -> String {
    let signature: Signature = key.sign(message);
    encode_signature(&signature.to_bytes())
}

/// Verifies `encoded` as a signature over `message` by `key`.
///
/// Accepts the canonical `z` + base58btc form, and hex as a legacy decode
/// fallback (spec §4.2) — but only for input; this crate never *produces*
/// hex-encoded signatures.
pub fn verify(key: &VerifyingKey, message: &[u8], encoded: &str) -> Result<()> {
    let bytes = decode_signature(encoded)?;
    let signature = Signature::from_bytes(&bytes);
    key.verify_strict(message, &signature)
        .map_err(|e| Error::sig(format!("cryptographic verification failed: {e}")))
}

/// Encodes a raw 64-byte signature as `z` + base58btc.
pub fn encode_signature(signature: &[u8; 64]) -> String {
    format!(
        "{MULTIBASE_BASE58BTC_PREFIX}{}",
        bs58::encode(signature).into_string()
    )
}

/// Decodes a multibase (or legacy hex) encoded signature into its 64 raw
/// bytes.
fn decode_signature(encoded: &str) -> Result<[u8; 64]> {
    let raw = if let Some(rest) = encoded.strip_prefix(MULTIBASE_BASE58BTC_PREFIX) {
        bs58::decode(rest)
            .into_vec()
            .map_err(|e| Error::sig(format!("invalid base58btc encoding: {e}")))?
    } else {
        hex::decode(encoded).map_err(|_| {
            Error::sig("signature is neither multibase (z-prefixed) nor legacy hex")
        })?
    };

    raw.try_into()
        .map_err(|v: Vec<u8>| Error::sig(format!("signature has wrong length: {} bytes", v.len())))
}
