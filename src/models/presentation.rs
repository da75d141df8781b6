// src/models/presentation.rs
//! DIF Presentation Exchange types.
//!
//! Only the subset the authorisation servers actually send is modelled:
//! descriptors with field constraints (`path` + JSON-schema `filter`).
//! Unknown members are tolerated and dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::serialization::json_path;

/// What the verifier wants presented for a scope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PresentationDefinition {
    pub id: String,
    #[serde(default)]
    pub input_descriptors: Vec<InputDescriptor>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Constraints {
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Field {
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl InputDescriptor {
    /// Whether decoded credential claims satisfy every field constraint.
    pub fn is_satisfied_by(&self, claims: &Value) -> bool {
        let fields = match &self.constraints {
            Some(c) => &c.fields,
            None => return true,
        };
        fields.iter().all(|field| {
            field
                .path
                .iter()
                .filter_map(|p| json_path(claims, p))
                .any(|value| field.filter.as_ref().map_or(true, |f| filter_matches(f, value)))
        })
    }

    /// Credential type the descriptor asks for, read from a filter on a
    /// `type` path (`const` or `contains.const`).
    pub fn required_type(&self) -> Option<String> {
        let constraints = self.constraints.as_ref()?;
        constraints
            .fields
            .iter()
            .filter(|f| f.path.iter().any(|p| p.ends_with("type")))
            .filter_map(|f| f.filter.as_ref())
            .find_map(|filter| {
                filter
                    .pointer("/contains/const")
                    .or_else(|| filter.get("const"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
    }
}

/// Applies the JSON-schema keywords seen in practice (`const`, `enum`,
/// `contains`, `type`). Keywords outside that set do not reject a value.
fn filter_matches(filter: &Value, value: &Value) -> bool {
    if let Some(expected) = filter.get("const") {
        if value != expected {
            return false;
        }
    }
    if let Some(options) = filter.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return false;
        }
    }
    if let Some(inner) = filter.get("contains") {
        match value.as_array() {
            Some(items) if items.iter().any(|item| filter_matches(inner, item)) => {}
            _ => return false,
        }
    }
    if let Some(kind) = filter.get("type").and_then(Value::as_str) {
        let ok = match kind {
            "array" => value.is_array(),
            "string" => value.is_string(),
            "object" => value.is_object(),
            "number" | "integer" => value.is_number(),
            "boolean" => value.is_boolean(),
            _ => true,
        };
        if !ok {
            return false;
        }
    }
    true
}

/// How the presented credentials map onto the definition's descriptors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PresentationSubmission {
    pub id: String,
    pub definition_id: String,
    /// Always serialized, even when empty.
    pub descriptor_map: Vec<DescriptorMapping>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DescriptorMapping {
    pub id: String,
    pub format: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_nested: Option<Box<DescriptorMapping>>,
}

impl DescriptorMapping {
    /// Mapping for the credential at `index` inside a `jwt_vp` presentation.
    pub fn jwt_vc_in_vp(descriptor_id: &str, index: usize) -> Self {
        Self {
            id: descriptor_id.to_string(),
            format: "jwt_vp".into(),
            path: "$".into(),
            path_nested: Some(Box::new(DescriptorMapping {
                id: descriptor_id.to_string(),
                format: "jwt_vc".into(),
                path: format!("$.vp.verifiableCredential[{index}]"),
                path_nested: None,
            })),
        }
    }
}
