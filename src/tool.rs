use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{RelayError, Result};

/// Declared type of a single tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(ParamType::String),
            "number" => Some(ParamType::Number),
            "integer" => Some(ParamType::Integer),
            "boolean" => Some(ParamType::Boolean),
            "array" => Some(ParamType::Array),
            "object" => Some(ParamType::Object),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A single named parameter in an [`InputSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub kind: ParamType,
    pub description: Option<String>,
}

/// Explicit parameter list for a tool: name to type, plus which ones are required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    params: BTreeMap<String, Param>,
    required: Vec<String>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required parameter.
    pub fn required(mut self, name: impl Into<String>, kind: ParamType) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.params.insert(name, Param { kind, description: None });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: ParamType) -> Self {
        self.params.insert(name.into(), Param { kind, description: None });
        self
    }

    pub fn describe(mut self, name: &str, description: impl Into<String>) -> Self {
        if let Some(param) = self.params.get_mut(name) {
            param.description = Some(description.into());
        }
        self
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.params.iter().map(|(name, param)| (name.as_str(), param))
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parses the JSON Schema object form used on the wire.
    pub fn from_json_schema(tool: &str, schema: &Value) -> Result<Self> {
        let invalid = |reason: String| RelayError::InvalidSchema {
            name: tool.to_string(),
            reason,
        };

        let object = schema
            .as_object()
            .ok_or_else(|| invalid("schema is not a JSON object".into()))?;

        match object.get("type").and_then(Value::as_str) {
            Some("object") | None => {}
            Some(other) => {
                return Err(invalid(format!(
                    "top-level type must be `object`, got `{other}`"
                )))
            }
        }

        let mut params = BTreeMap::new();
        match object.get("properties") {
            None | Some(Value::Null) => {}
            Some(Value::Object(properties)) => {
                for (name, property) in properties {
                    let kind = match property.get("type") {
                        None => ParamType::Any,
                        Some(Value::String(raw)) => ParamType::parse(raw).ok_or_else(|| {
                            invalid(format!("parameter `{name}` has unknown type `{raw}`"))
                        })?,
                        Some(other) => {
                            return Err(invalid(format!(
                                "parameter `{name}` has non-string type {other}"
                            )))
                        }
                    };
                    let description = property
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    params.insert(name.clone(), Param { kind, description });
                }
            }
            Some(_) => return Err(invalid("`properties` must be an object".into())),
        }

        let mut required = Vec::new();
        if let Some(list) = object.get("required").and_then(Value::as_array) {
            for entry in list {
                let name = entry
                    .as_str()
                    .ok_or_else(|| invalid("`required` entries must be strings".into()))?;
                if !params.contains_key(name) {
                    return Err(invalid(format!("required parameter `{name}` is not declared")));
                }
                required.push(name.to_string());
            }
        }

        Ok(Self { params, required })
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for (name, param) in &self.params {
            let mut property = Map::new();
            if param.kind != ParamType::Any {
                property.insert("type".into(), Value::String(param.kind.to_string()));
            }
            if let Some(description) = &param.description {
                property.insert("description".into(), Value::String(description.clone()));
            }
            properties.insert(name.clone(), Value::Object(property));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    /// Checks that every required parameter is present and every known one has the declared type.
    pub fn validate(&self, tool: &str, arguments: &Value) -> Result<()> {
        let invalid = |reason: String| RelayError::InvalidArguments {
            name: tool.to_string(),
            reason,
        };
        let object = match arguments {
            Value::Object(object) => object,
            Value::Null if self.required.is_empty() => return Ok(()),
            other => return Err(invalid(format!("expected an object, got {other}"))),
        };
        for name in &self.required {
            if !object.contains_key(name) {
                return Err(invalid(format!("missing required parameter `{name}`")));
            }
        }
        for (name, value) in object {
            if let Some(param) = self.params.get(name) {
                if !param.kind.matches(value) {
                    return Err(invalid(format!(
                        "parameter `{name}` must be of type {}",
                        param.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Static description of a tool, as advertised by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Value::String(text.into()),
            error: None,
        }
    }

    pub fn value(content: Value) -> Self {
        Self {
            content,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: Value::String(message.clone()),
            error: Some(message),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Flattens the content into a display string.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> InputSchema;
    async fn call(&self, arguments: Value) -> Result<ToolCallResult>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(RelayError::InvalidSchema {
                name,
                reason: "tool name must not be empty".into(),
            });
        }
        if self.tools.contains_key(&name) {
            return Err(RelayError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Moves every tool of `other` into this registry.
    pub fn merge(&mut self, other: ToolRegistry) -> Result<()> {
        for (_, tool) in other.tools {
            self.register_arc(tool)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|tool| tool.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RelayError::UnknownTool(name.to_string()))?;
        tool.call(arguments).await
    }
}
