//! The capability data model and its JSON-LD projection (spec §3, §4.4).

use crate::caveat::Caveat;
use crate::context;
use crate::did::{Did, Keyring, PartyRef};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A resource reference: `{id, type, ...}` with any additional properties
/// preserved verbatim (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub id: String,
    pub target_type: String,
    pub additional: IndexMap<String, Value>,
}

impl Target {
    /// Builds a target with no additional properties.
    pub fn new(id: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_type: target_type.into(),
            additional: IndexMap::new(),
        }
    }

    fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("type".into(), Value::String(self.target_type.clone()));
        for (k, v) in &self.additional {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("target must be a JSON object"))?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("target requires 'id'"))?
            .to_string();
        let target_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("target requires 'type'"))?
            .to_string();
        let additional = obj
            .iter()
            .filter(|(k, _)| *k != "id" && *k != "type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            id,
            target_type,
            additional,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.target_type)
    }
}

/// A named action with its associated parameters (spec §3).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Action {
    pub name: String,
    pub parameters: IndexMap<String, Value>,
}

impl Action {
    /// Builds an action with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: IndexMap::new(),
        }
    }

    fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert(
            "parameters".into(),
            Value::Object(self.parameters.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );
        Value::Object(map)
    }

    fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("action must be a JSON object"))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("action requires 'name'"))?
            .to_string();
        let parameters = obj
            .get("parameters")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(Self { name, parameters })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.parameters.is_empty() {
            write!(f, "(")?;
            for (i, (k, v)) in self.parameters.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// The purpose a [`Proof`] was generated for (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofPurpose {
    CapabilityDelegation,
    CapabilityInvocation,
}

impl ProofPurpose {
    fn as_str(&self) -> &'static str {
        match self {
            ProofPurpose::CapabilityDelegation => "capabilityDelegation",
            ProofPurpose::CapabilityInvocation => "capabilityInvocation",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "capabilityDelegation" => Ok(ProofPurpose::CapabilityDelegation),
            "capabilityInvocation" => Ok(ProofPurpose::CapabilityInvocation),
            other => Err(Error::validation(format!("unknown proof purpose '{other}'"))),
        }
    }
}

/// An Ed25519Signature2020 proof attached to a capability or invocation
/// document (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub struct Proof {
    pub created: DateTime<Utc>,
    pub verification_method: String,
    pub proof_purpose: ProofPurpose,
    pub proof_value: String,
}

const PROOF_TYPE: &str = "Ed25519Signature2020";

impl Proof {
    fn to_json(&self) -> Value {
        serde_json::json!({
            "type": PROOF_TYPE,
            "created": self.created.to_rfc3339(),
            "verification_method": self.verification_method,
            "proof_purpose": self.proof_purpose.as_str(),
            "proof_value": self.proof_value,
        })
    }

    fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("proof must be a JSON object"))?;
        let proof_type = obj.get("type").and_then(Value::as_str).unwrap_or_default();
        if proof_type != PROOF_TYPE {
            return Err(Error::validation(format!(
                "unsupported proof type '{proof_type}'"
            )));
        }
        let created = parse_timestamp(obj, "created")?;
        let verification_method = obj
            .get("verification_method")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("proof requires 'verification_method'"))?
            .to_string();
        let proof_purpose = ProofPurpose::parse(
            obj.get("proof_purpose")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("proof requires 'proof_purpose'"))?,
        )?;
        let proof_value = obj
            .get("proof_value")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("proof requires 'proof_value'"))?
            .to_string();
        Ok(Self {
            created,
            verification_method,
            proof_purpose,
            proof_value,
        })
    }
}

fn parse_timestamp(obj: &serde_json::Map<String, Value>, key: &str) -> Result<DateTime<Utc>> {
    let raw = obj
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation(format!("missing timestamp field '{key}'")))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("invalid timestamp '{raw}': {e}")))
}

/// A signed (or about-to-be-signed) authorization capability (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub struct Capability {
    pub id: String,
    pub context: Vec<String>,
    pub controller: PartyRef,
    pub invoker: PartyRef,
    pub target: Target,
    pub actions: Vec<Action>,
    pub caveats: Vec<Caveat>,
    pub parent_capability: Option<String>,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub proof: Option<Proof>,
}

const CAPABILITY_TYPE: &str = "zcap";

impl Capability {
    /// Builds and signs a new root capability (spec §6: `create_capability`).
    pub fn create(
        controller: PartyRef,
        invoker: PartyRef,
        actions: Vec<Action>,
        target: Target,
        controller_key: &Keyring,
        expires: Option<DateTime<Utc>>,
        caveats: Option<Vec<Caveat>>,
    ) -> Result<Self> {
        if actions.is_empty() {
            return Err(Error::validation(
                "a capability must grant at least one action",
            ));
        }
        if controller_key.did() != &controller.id {
            return Err(Error::validation(
                "controller_key does not correspond to the controller DID",
            ));
        }

        let unsigned = Capability {
            id: new_urn(),
            context: context::default_context(),
            controller: controller.clone(),
            invoker,
            target,
            actions,
            caveats: caveats.unwrap_or_default(),
            parent_capability: None,
            created: Utc::now(),
            expires,
            proof: None,
        };

        let bytes = crate::canonical::canonicalize(&unsigned.to_jsonld_unsigned())?;
        let proof_value = crate::crypto::sign(controller_key.signing_key(), &bytes);
        let capability = Capability {
            proof: Some(Proof {
                created: unsigned.created,
                verification_method: format!("{}#key-1", controller_key.did()),
                proof_purpose: ProofPurpose::CapabilityDelegation,
                proof_value,
            }),
            ..unsigned
        };
        tracing::debug!(
            capability_id = %capability.id,
            controller = %capability.controller.id,
            invoker = %capability.invoker.id,
            "capability created"
        );
        Ok(capability)
    }

    /// Projects this capability to its JSON-LD mapping, including the proof
    /// if one is attached.
    pub fn to_jsonld(&self) -> Value {
        let mut map = self.to_jsonld_fields();
        if let Some(proof) = &self.proof {
            map.insert("proof".into(), proof.to_json());
        }
        Value::Object(map)
    }

    /// Projects this capability to its JSON-LD mapping with `proof`
    /// stripped — the canonicalization input for both signing and
    /// verification (spec §4.1).
    pub fn to_jsonld_unsigned(&self) -> Value {
        Value::Object(self.to_jsonld_fields())
    }

    fn to_jsonld_fields(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert(
            "context".into(),
            Value::Array(self.context.iter().cloned().map(Value::String).collect()),
        );
        map.insert("type".into(), Value::String(CAPABILITY_TYPE.into()));
        map.insert(
            "controller".into(),
            serde_json::to_value(&self.controller).expect("PartyRef always serializes"),
        );
        map.insert(
            "invoker".into(),
            serde_json::to_value(&self.invoker).expect("PartyRef always serializes"),
        );
        map.insert("target".into(), self.target.to_json());
        map.insert(
            "actions".into(),
            Value::Array(self.actions.iter().map(Action::to_json).collect()),
        );
        map.insert(
            "caveats".into(),
            Value::Array(self.caveats.iter().map(Caveat::to_json).collect()),
        );
        if let Some(parent) = &self.parent_capability {
            map.insert("parent_capability".into(), Value::String(parent.clone()));
        }
        map.insert("created".into(), Value::String(self.created.to_rfc3339()));
        if let Some(expires) = &self.expires {
            map.insert("expires".into(), Value::String(expires.to_rfc3339()));
        }
        map
    }

    /// Parses a capability from its JSON-LD mapping, validating the
    /// structural invariants from spec §3/§4.4.
    pub fn from_jsonld(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("capability must be a JSON object"))?;

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("capability requires 'id'"))?
            .to_string();

        let context: Vec<String> = obj
            .get("context")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::validation("capability requires 'context'"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::validation("context entries must be strings"))
            })
            .collect::<Result<_>>()?;

        let type_ = obj.get("type").and_then(Value::as_str).unwrap_or_default();
        if type_ != CAPABILITY_TYPE {
            return Err(Error::validation(format!("unexpected capability type '{type_}'")));
        }

        let controller: PartyRef = serde_json::from_value(
            obj.get("controller")
                .cloned()
                .ok_or_else(|| Error::validation("capability requires 'controller'"))?,
        )
        .map_err(|e| Error::validation(format!("invalid 'controller': {e}")))?;

        let invoker: PartyRef = serde_json::from_value(
            obj.get("invoker")
                .cloned()
                .ok_or_else(|| Error::validation("capability requires 'invoker'"))?,
        )
        .map_err(|e| Error::validation(format!("invalid 'invoker': {e}")))?;

        let target = Target::from_json(
            obj.get("target")
                .ok_or_else(|| Error::validation("capability requires 'target'"))?,
        )?;

        let actions: Vec<Action> = obj
            .get("actions")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::validation("capability requires 'actions'"))?
            .iter()
            .map(Action::from_json)
            .collect::<Result<_>>()?;
        if actions.is_empty() {
            return Err(Error::validation("'actions' must be non-empty"));
        }

        let caveats: Vec<Caveat> = obj
            .get("caveats")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Caveat::from_json).collect::<Result<_>>())
            .transpose()?
            .unwrap_or_default();

        let parent_capability = obj
            .get("parent_capability")
            .and_then(Value::as_str)
            .map(str::to_string);

        let created = parse_timestamp(obj, "created")?;

        let expires = obj
            .get("expires")
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| Error::validation("'expires' must be a string"))
                    .and_then(|s| {
                        DateTime::parse_from_rfc3339(s)
                            .map(|dt| dt.with_timezone(&Utc))
                            .map_err(|e| Error::validation(format!("invalid 'expires': {e}")))
                    })
            })
            .transpose()?;

        let proof = obj.get("proof").map(Proof::from_json).transpose()?;

        Ok(Capability {
            id,
            context,
            controller,
            invoker,
            target,
            actions,
            caveats,
            parent_capability,
            created,
            expires,
            proof,
        })
    }
}

/// A signed invocation document (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub struct InvocationDocument {
    pub id: String,
    pub capability: String,
    pub action: Action,
    pub created: DateTime<Utc>,
    pub nonce: String,
    pub proof: Option<Proof>,
}

const INVOCATION_TYPE: &str = "CapabilityInvocation";

impl InvocationDocument {
    pub fn to_jsonld(&self) -> Value {
        let mut map = self.to_jsonld_fields();
        if let Some(proof) = &self.proof {
            map.insert("proof".into(), proof.to_json());
        }
        Value::Object(map)
    }

    pub fn to_jsonld_unsigned(&self) -> Value {
        Value::Object(self.to_jsonld_fields())
    }

    fn to_jsonld_fields(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("type".into(), Value::String(INVOCATION_TYPE.into()));
        map.insert("capability".into(), Value::String(self.capability.clone()));
        map.insert("action".into(), self.action.to_json());
        map.insert("created".into(), Value::String(self.created.to_rfc3339()));
        map.insert("nonce".into(), Value::String(self.nonce.clone()));
        map
    }

    pub fn from_jsonld(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("invocation must be a JSON object"))?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("invocation requires 'id'"))?
            .to_string();
        let type_ = obj.get("type").and_then(Value::as_str).unwrap_or_default();
        if type_ != INVOCATION_TYPE {
            return Err(Error::validation(format!("unexpected invocation type '{type_}'")));
        }
        let capability = obj
            .get("capability")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("invocation requires 'capability'"))?
            .to_string();
        let action = Action::from_json(
            obj.get("action")
                .ok_or_else(|| Error::validation("invocation requires 'action'"))?,
        )?;
        let created = parse_timestamp(obj, "created")?;
        let nonce = obj
            .get("nonce")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("invocation requires 'nonce'"))?
            .to_string();
        let proof = obj.get("proof").map(Proof::from_json).transpose()?;
        Ok(InvocationDocument {
            id,
            capability,
            action,
            created,
            nonce,
            proof,
        })
    }
}

fn new_urn() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}
