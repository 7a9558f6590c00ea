use serde::{Deserialize, Serialize};

use super::field::ValidationSet;
use super::Value;

/// Per-tenant content override for one field of one schema.
///
/// Only content attributes are overridable; visibility, editability and
/// required state are owned by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantOverride {
    pub schema_id: String,
    pub tenant_id: String,
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "ValidationSet::is_empty")]
    pub validation: ValidationSet,
}

impl TenantOverride {
    #[must_use]
    pub fn new(schema_id: &str, tenant_id: &str, field_name: &str) -> Self {
        Self {
            schema_id: schema_id.to_owned(),
            tenant_id: tenant_id.to_owned(),
            field_name: field_name.to_owned(),
            label: None,
            placeholder: None,
            help: None,
            default: None,
            validation: ValidationSet::new(),
        }
    }

    #[must_use]
    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    #[must_use]
    pub fn placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_owned());
        self
    }

    #[must_use]
    pub fn help(mut self, help: &str) -> Self {
        self.help = Some(help.to_owned());
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn validation(mut self, rule: super::ValidationRule) -> Self {
        self.validation.insert(rule);
        self
    }
}
