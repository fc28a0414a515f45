//! The caveat evaluator (spec §4.3): a tagged predicate attached to a
//! capability, checked both at chain-verification time (time-only context)
//! and at invocation time (full context).

use crate::store::RevokedSet;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A single recognized or unrecognized caveat.
///
/// Modeled as a tagged variant per known shape plus an `Unknown` catch-all
/// that preserves whatever fields an unrecognized tag carried, per the
/// "dynamic dictionaries" design note (spec §9): the source's caveats are
/// open mappings, and a caveat the evaluator doesn't understand still needs
/// to round-trip faithfully through `to_json`/`from_json` even though it
/// always fails evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum Caveat {
    /// Passes while `now <= date`.
    ValidUntil { date: DateTime<Utc> },
    /// Passes while `now >= date`.
    ValidAfter { date: DateTime<Utc> },
    /// Passes when the action being performed is named here (only checked
    /// when an action name is present in the evaluation context).
    AllowedAction { actions: Vec<String> },
    /// Passes when `name` is present among the invocation parameters, and
    /// (if given) equals `value`.
    RequireParameter { name: String, value: Option<Value> },
    /// Opaque to the core: the caller must track usage counts itself.
    MaxUses {
        limit: u64,
        extra: IndexMap<String, Value>,
    },
    /// Opaque to the core: network restrictions are the caller's concern.
    AllowedNetwork { extra: IndexMap<String, Value> },
    /// Passes while `resource_id` has not been revoked.
    ValidWhileTrue { resource_id: String },
    /// A tag this evaluator does not recognize; always fails closed.
    Unknown {
        tag: String,
        fields: IndexMap<String, Value>,
    },
}

impl Caveat {
    /// The `type` tag as it appears on the wire.
    pub fn tag(&self) -> &str {
        match self {
            Caveat::ValidUntil { .. } => "ValidUntil",
            Caveat::ValidAfter { .. } => "ValidAfter",
            Caveat::AllowedAction { .. } => "AllowedAction",
            Caveat::RequireParameter { .. } => "RequireParameter",
            Caveat::MaxUses { .. } => "MaxUses",
            Caveat::AllowedNetwork { .. } => "AllowedNetwork",
            Caveat::ValidWhileTrue { .. } => "ValidWhileTrue",
            Caveat::Unknown { tag, .. } => tag,
        }
    }

    /// Parses a caveat from its JSON-LD mapping form.
    pub fn from_json(value: &Value) -> crate::error::Result<Self> {
        use crate::error::Error;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("caveat must be a JSON object"))?;
        let tag = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("caveat is missing its 'type' tag"))?;

        let mut rest: IndexMap<String, Value> = obj
            .iter()
            .filter(|(k, _)| *k != "type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let caveat = match tag {
            "ValidUntil" => Caveat::ValidUntil {
                date: take_date(&mut rest, "date")?,
            },
            "ValidAfter" => Caveat::ValidAfter {
                date: take_date(&mut rest, "date")?,
            },
            "AllowedAction" => {
                let actions = rest
                    .shift_remove("actions")
                    .and_then(|v| v.as_array().cloned())
                    .ok_or_else(|| Error::validation("AllowedAction requires 'actions'"))?
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| Error::validation("'actions' entries must be strings"))
                    })
                    .collect::<crate::error::Result<_>>()?;
                Caveat::AllowedAction { actions }
            }
            "RequireParameter" => {
                let name = rest
                    .shift_remove("name")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| Error::validation("RequireParameter requires 'name'"))?;
                let value = rest.shift_remove("value");
                Caveat::RequireParameter { name, value }
            }
            "MaxUses" => {
                let limit = rest
                    .shift_remove("limit")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| Error::validation("MaxUses requires a numeric 'limit'"))?;
                Caveat::MaxUses { limit, extra: rest }
            }
            "AllowedNetwork" => Caveat::AllowedNetwork { extra: rest },
            "ValidWhileTrue" => {
                let resource_id = rest
                    .shift_remove("resource_id")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| {
                        Error::validation("ValidWhileTrue requires 'resource_id'")
                    })?;
                Caveat::ValidWhileTrue { resource_id }
            }
            other => Caveat::Unknown {
                tag: other.to_string(),
                fields: rest,
            },
        };
        Ok(caveat)
    }

    /// Projects a caveat back to its JSON-LD mapping form.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("type".to_string(), Value::String(self.tag().to_string()));
        match self {
            Caveat::ValidUntil { date } | Caveat::ValidAfter { date } => {
                map.insert("date".to_string(), Value::String(date.to_rfc3339()));
            }
            Caveat::AllowedAction { actions } => {
                map.insert(
                    "actions".to_string(),
                    Value::Array(actions.iter().cloned().map(Value::String).collect()),
                );
            }
            Caveat::RequireParameter { name, value } => {
                map.insert("name".to_string(), Value::String(name.clone()));
                if let Some(v) = value {
                    map.insert("value".to_string(), v.clone());
                }
            }
            Caveat::MaxUses { limit, extra } => {
                map.insert("limit".to_string(), Value::from(*limit));
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
            }
            Caveat::AllowedNetwork { extra } => {
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
            }
            Caveat::ValidWhileTrue { resource_id } => {
                map.insert("resource_id".to_string(), Value::String(resource_id.clone()));
            }
            Caveat::Unknown { fields, .. } => {
                for (k, v) in fields {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(map)
    }
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caveat::ValidUntil { date } => write!(f, "ValidUntil({date})"),
            Caveat::ValidAfter { date } => write!(f, "ValidAfter({date})"),
            Caveat::AllowedAction { actions } => write!(f, "AllowedAction({})", actions.join(", ")),
            Caveat::RequireParameter { name, value: _ } => write!(f, "RequireParameter({name})"),
            Caveat::MaxUses { limit, .. } => write!(f, "MaxUses({limit})"),
            Caveat::AllowedNetwork { .. } => write!(f, "AllowedNetwork"),
            Caveat::ValidWhileTrue { resource_id } => write!(f, "ValidWhileTrue({resource_id})"),
            Caveat::Unknown { tag, .. } => write!(f, "Unknown({tag})"),
        }
    }
}

fn take_date(
    rest: &mut IndexMap<String, Value>,
    key: &str,
) -> crate::error::Result<DateTime<Utc>> {
    use crate::error::Error;
    let raw = rest
        .shift_remove(key)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| Error::validation(format!("caveat requires a '{key}' timestamp")))?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("invalid timestamp '{raw}': {e}")))
}

/// The context a caveat is evaluated against.
///
/// At chain-verification time (spec §4.5 step 3) `action_name` and
/// `parameters` are absent; at invocation time (spec §4.6 step 3) they are
/// populated with the action actually being performed.
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    pub action_name: Option<&'a str>,
    pub parameters: Option<&'a IndexMap<String, Value>>,
    pub revoked_ids: Option<&'a RevokedSet>,
}

/// The result of evaluating a single caveat that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The caveat is satisfied.
    Pass,
    /// The caveat cannot be decided by the core; the caller must enforce it.
    Opaque,
}

/// A caveat the core could not fully decide, surfaced to the caller as an
/// advisory rather than an error (spec §7).
#[derive(Debug, Clone)]
pub struct OpaqueNotice {
    pub capability_id: String,
    pub caveat: Caveat,
}

/// Evaluates a single caveat against `ctx` (spec §4.3).
pub fn evaluate_caveat(caveat: &Caveat, ctx: &EvalContext<'_>) -> crate::error::Result<Outcome> {
    use crate::error::Error;
    match caveat {
        Caveat::ValidUntil { date } => {
            if ctx.now <= *date {
                Ok(Outcome::Pass)
            } else {
                Err(Error::caveat(Some(caveat.tag()), format!("expired at {date}")))
            }
        }
        Caveat::ValidAfter { date } => {
            if ctx.now >= *date {
                Ok(Outcome::Pass)
            } else {
                Err(Error::caveat(Some(caveat.tag()), format!("not valid until {date}")))
            }
        }
        Caveat::AllowedAction { actions } => match ctx.action_name {
            None => Ok(Outcome::Pass),
            Some(name) => {
                if actions.iter().any(|a| a == name) {
                    Ok(Outcome::Pass)
                } else {
                    Err(Error::caveat(
                        Some(caveat.tag()),
                        format!("action '{name}' is not in the allowed set"),
                    ))
                }
            }
        },
        Caveat::RequireParameter { name, value } => {
            let found = ctx.parameters.and_then(|p| p.get(name));
            match (found, value) {
                (None, _) => Err(Error::caveat(
                    Some(caveat.tag()),
                    format!("missing required parameter '{name}'"),
                )),
                (Some(_), None) => Ok(Outcome::Pass),
                (Some(actual), Some(expected)) if actual == expected => Ok(Outcome::Pass),
                (Some(_), Some(_)) => Err(Error::caveat(
                    Some(caveat.tag()),
                    format!("parameter '{name}' does not match required value"),
                )),
            }
        }
        Caveat::ValidWhileTrue { resource_id } => {
            let revoked = ctx
                .revoked_ids
                .map(|r| r.contains(resource_id))
                .unwrap_or(false);
            if revoked {
                Err(Error::caveat(
                    Some(caveat.tag()),
                    format!("resource '{resource_id}' has been revoked"),
                ))
            } else {
                Ok(Outcome::Pass)
            }
        }
        Caveat::MaxUses { .. } | Caveat::AllowedNetwork { .. } => Ok(Outcome::Opaque),
        Caveat::Unknown { tag, .. } => Err(Error::caveat(
            Some(tag.clone()),
            "unrecognized caveat tag",
        )),
    }
}

/// Evaluates every caveat of a capability in declaration order, stopping at
/// the first failure and collecting opaque notices along the way.
pub fn evaluate_all(
    capability_id: &str,
    caveats: &[Caveat],
    ctx: &EvalContext<'_>,
) -> crate::error::Result<Vec<OpaqueNotice>> {
    let mut opaque = Vec::new();
    for caveat in caveats {
        match evaluate_caveat(caveat, ctx)? {
            Outcome::Pass => {}
            Outcome::Opaque => opaque.push(OpaqueNotice {
                capability_id: capability_id.to_string(),
                caveat: caveat.clone(),
            }),
        }
    }
    Ok(opaque)
}

/// Checks that every caveat present on a parent is also present on its
/// child (spec §4.5 step 7: caveats accumulate, never weaken), comparing by
/// canonical JSON form as the spec requires ("identity comparison by
/// canonical form").
pub fn parent_caveats_preserved(parent: &[Caveat], child: &[Caveat]) -> bool {
    let child_canon: Vec<BTreeMap<String, Value>> = child.iter().map(canonical_map).collect();
    parent
        .iter()
        .map(canonical_map)
        .all(|pc| child_canon.contains(&pc))
}

fn canonical_map(caveat: &Caveat) -> BTreeMap<String, Value> {
    match caveat.to_json() {
        Value::Object(map) => map.into_iter().collect(),
        _ => unreachable!("to_json always produces an object"),
    }
}
