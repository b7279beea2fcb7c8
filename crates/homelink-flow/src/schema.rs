//! Form schemas.
//!
//! A form step declares the fields it expects; the manager validates user
//! input against the schema before the step method ever sees it. Validation
//! failures surface as a form re-render with an `errors` map keyed by field
//! name, never as an exception.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data type of a form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    /// One of a fixed set of options.
    Select,
}

/// One field in a form schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Options for `Select` fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Value suggested to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FormField {
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn select(name: impl Into<String>, options: Vec<String>) -> Self {
        let mut field = Self::new(name, FieldType::Select);
        field.options = options;
        field
    }

    fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            options: Vec::new(),
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Schema for one form step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormSchema {
    pub fields: Vec<FormField>,
}

impl FormSchema {
    pub fn new(fields: Vec<FormField>) -> Self {
        Self { fields }
    }

    /// Validate user input against the schema.
    ///
    /// Returns the normalized input on success, or a map of field name to
    /// error code on failure. Missing optional fields are filled from their
    /// defaults.
    pub fn validate(&self, input: &Value) -> Result<Value, HashMap<String, String>> {
        let mut errors = HashMap::new();
        let mut normalized = serde_json::Map::new();

        let input_map = match input.as_object() {
            Some(map) => map,
            None => {
                errors.insert("base".to_string(), "invalid_input".to_string());
                return Err(errors);
            }
        };

        for field in &self.fields {
            let value = input_map.get(&field.name).cloned().or_else(|| field.default.clone());
            let value = match value {
                Some(v) if !v.is_null() => v,
                _ => {
                    if field.required {
                        errors.insert(field.name.clone(), "required".to_string());
                    }
                    continue;
                }
            };

            let ok = match field.field_type {
                FieldType::Text => value.is_string(),
                FieldType::Integer => value.is_i64() || value.is_u64(),
                FieldType::Boolean => value.is_boolean(),
                FieldType::Select => value
                    .as_str()
                    .map(|s| field.options.iter().any(|o| o == s))
                    .unwrap_or(false),
            };

            if ok {
                normalized.insert(field.name.clone(), value);
            } else {
                errors.insert(field.name.clone(), "invalid_value".to_string());
            }
        }

        if errors.is_empty() {
            Ok(Value::Object(normalized))
        } else {
            Err(errors)
        }
    }
}
