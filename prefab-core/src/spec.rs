//! Unit interface descriptions.
//!
//! A [`UnitSpec`] is the stored record for one `(unit_id, version)`: the
//! declared functions plus deployment bookkeeping. [`SpecDocument`] is the
//! part a publisher supplies.

use crate::deployment::DeploymentStatus;
use crate::error::{GatewayError, PrefabResult};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Return property type marking a file the unit writes into its workspace.
pub const OUTPUT_FILE_TYPE: &str = "OutputFile";

/// Identity of a spec row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpecKey {
    pub unit_id: String,
    pub version: String,
}

impl SpecKey {
    pub fn new(unit_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            version: version.into(),
        }
    }

    /// Key used by fast-tier caches.
    pub fn cache_key(&self) -> String {
        format!("spec:{}:{}", self.unit_id, self.version)
    }
}

impl fmt::Display for SpecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.unit_id, self.version)
    }
}

/// Declared runtime type of a function parameter.
///
/// Unknown type names are kept verbatim and never type-checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    InputFile,
    Other(String),
}

impl ParamType {
    pub fn as_str(&self) -> &str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::InputFile => "InputFile",
            ParamType::Other(s) => s,
        }
    }

    /// Whether `value` has the runtime shape this type demands.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String | ParamType::InputFile => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Other(_) => true,
        }
    }
}

impl Default for ParamType {
    fn default() -> Self {
        ParamType::String
    }
}

impl From<String> for ParamType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "string" => ParamType::String,
            "number" => ParamType::Number,
            "integer" => ParamType::Integer,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            "InputFile" => ParamType::InputFile,
            _ => ParamType::Other(s),
        }
    }
}

impl From<ParamType> for String {
    fn from(t: ParamType) -> Self {
        t.as_str().to_string()
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub param_type: ParamType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SecretDescriptor {
    pub name: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReturnProperty {
    #[serde(rename = "type")]
    pub property_type: String,
}

impl ReturnProperty {
    pub fn is_output_file(&self) -> bool {
        self.property_type == OUTPUT_FILE_TYPE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReturnShape {
    #[serde(default)]
    pub properties: BTreeMap<String, ReturnProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamDescriptor>,
    #[serde(default)]
    pub returns: ReturnShape,
    #[serde(default)]
    pub secrets: Vec<SecretDescriptor>,
}

impl FunctionDescriptor {
    /// Check call inputs against the declared parameters.
    ///
    /// Missing required parameters and wrong runtime types are rejected.
    /// Keys with no declaration pass through untouched.
    pub fn validate_inputs(&self, inputs: &Map<String, Value>) -> PrefabResult<()> {
        for param in &self.parameters {
            match inputs.get(&param.name) {
                None if param.required => {
                    return Err(GatewayError::Validation(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                None => {}
                Some(value) if !param.param_type.accepts(value) => {
                    return Err(GatewayError::Validation(format!(
                        "parameter '{}' must be of type {}",
                        param.name,
                        param.param_type.as_str()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Parameters declared as `InputFile` that the call actually supplied.
    pub fn supplied_input_files<'a>(
        &'a self,
        inputs: &'a Map<String, Value>,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.parameters
            .iter()
            .filter(|p| p.param_type == ParamType::InputFile)
            .filter_map(move |p| {
                inputs
                    .get(&p.name)
                    .and_then(Value::as_str)
                    .map(|v| (p.name.as_str(), v))
            })
    }

    /// Names of return properties typed `OutputFile`.
    pub fn output_file_properties(&self) -> impl Iterator<Item = &str> {
        self.returns
            .properties
            .iter()
            .filter(|(_, p)| p.is_output_file())
            .map(|(name, _)| name.as_str())
    }
}

/// What a publisher submits for a `(unit_id, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SpecDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub functions: Vec<FunctionDescriptor>,
}

/// Stored spec row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UnitSpec {
    pub unit_id: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub functions: Vec<FunctionDescriptor>,
    pub deployment_status: DeploymentStatus,
    pub endpoint_url: Option<String>,
    pub artifact_url: Option<String>,
    pub source_repo: Option<String>,
    pub call_count: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_called_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub deployed_at: Option<Timestamp>,
}

/// Result of applying a deployment transition to a spec row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },
    /// Target equals the current status; nothing was touched.
    Unchanged(DeploymentStatus),
    Rejected {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },
}

impl UnitSpec {
    pub fn from_document(key: SpecKey, document: SpecDocument, now: Timestamp) -> Self {
        Self {
            unit_id: key.unit_id,
            version: key.version,
            name: document.name,
            description: document.description,
            functions: document.functions,
            deployment_status: DeploymentStatus::Pending,
            endpoint_url: None,
            artifact_url: None,
            source_repo: None,
            call_count: 0,
            last_called_at: None,
            created_at: now,
            updated_at: now,
            deployed_at: None,
        }
    }

    /// Row created when a deployment event arrives before any publish.
    pub fn placeholder(key: SpecKey, now: Timestamp) -> Self {
        let document = SpecDocument {
            name: key.unit_id.clone(),
            description: String::new(),
            functions: Vec::new(),
        };
        Self::from_document(key, document, now)
    }

    pub fn key(&self) -> SpecKey {
        SpecKey::new(&self.unit_id, &self.version)
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Replace the interface content, keeping lifecycle and usage fields.
    pub fn replace_document(&mut self, document: SpecDocument, now: Timestamp) {
        self.name = document.name;
        self.description = document.description;
        self.functions = document.functions;
        self.updated_at = now;
    }

    /// Move to `target` if the lifecycle allows it.
    ///
    /// Entering `DEPLOYED` records `deployed_at` and, when given, the
    /// endpoint URL. A repeated target is [`TransitionOutcome::Unchanged`]
    /// and leaves every field as it was.
    pub fn apply_transition(
        &mut self,
        target: DeploymentStatus,
        endpoint_url: Option<&str>,
        now: Timestamp,
    ) -> TransitionOutcome {
        let from = self.deployment_status;
        if from == target {
            return TransitionOutcome::Unchanged(from);
        }
        if !from.can_transition_to(target) {
            return TransitionOutcome::Rejected { from, to: target };
        }
        self.deployment_status = target;
        self.updated_at = now;
        if target == DeploymentStatus::Deployed {
            self.deployed_at = Some(now);
            if let Some(url) = endpoint_url {
                self.endpoint_url = Some(url.to_string());
            }
        }
        TransitionOutcome::Applied { from, to: target }
    }

    pub fn record_call(&mut self, now: Timestamp) {
        self.call_count += 1;
        self.last_called_at = Some(now);
    }
}

/// Read shape handed to calling agents: identity, description, signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SpecView {
    pub unit_id: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub functions: Vec<FunctionDescriptor>,
}

impl From<UnitSpec> for SpecView {
    fn from(spec: UnitSpec) -> Self {
        Self {
            unit_id: spec.unit_id,
            version: spec.version,
            name: spec.name,
            description: spec.description,
            functions: spec.functions,
        }
    }
}
