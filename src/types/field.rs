use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use super::Value;

/// Closed set of field type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Email,
    Textarea,
    Number,
    Choice,
    MultiChoice,
    Date,
    DateTime,
    Boolean,
    File,
    Composite,
    Hidden,
}

impl FieldType {
    pub const ALL: [FieldType; 12] = [
        FieldType::Text,
        FieldType::Email,
        FieldType::Textarea,
        FieldType::Number,
        FieldType::Choice,
        FieldType::MultiChoice,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Boolean,
        FieldType::File,
        FieldType::Composite,
        FieldType::Hidden,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Choice => "choice",
            FieldType::MultiChoice => "multi_choice",
            FieldType::Date => "date",
            FieldType::DateTime => "date_time",
            FieldType::Boolean => "boolean",
            FieldType::File => "file",
            FieldType::Composite => "composite",
            FieldType::Hidden => "hidden",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<FieldType> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    fn is_text_family(self) -> bool {
        matches!(self, FieldType::Text | FieldType::Email | FieldType::Textarea)
    }

    /// Whether a field declared as `self` may be redeclared as `other`.
    #[must_use]
    pub fn compatible_with(self, other: FieldType) -> bool {
        self == other || (self.is_text_family() && other.is_text_family())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validation constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum ValidationRule {
    MinLength(u32),
    MaxLength(u32),
    Min(f64),
    Max(f64),
    Pattern(String),
    Format(String),
    OneOf(Vec<Value>),
    MinItems(u32),
    MaxItems(u32),
}

impl ValidationRule {
    fn same_kind(&self, other: &ValidationRule) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// Ordered, duplicate-free collection of validation rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationSet(Vec<ValidationRule>);

impl ValidationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `rule` unless an identical rule is already present.
    pub fn insert(&mut self, rule: ValidationRule) {
        if !self.0.contains(&rule) {
            self.0.push(rule);
        }
    }

    /// Union in order of first appearance. Nothing is ever removed.
    pub fn union(&mut self, other: &ValidationSet) {
        for rule in &other.0 {
            self.insert(rule.clone());
        }
    }

    /// Replace the first existing rule of the same kind, or append.
    pub fn override_with(&mut self, rule: ValidationRule) {
        match self.0.iter_mut().find(|r| r.same_kind(&rule)) {
            Some(existing) => *existing = rule,
            None => self.0.push(rule),
        }
    }

    #[must_use]
    pub fn contains(&self, rule: &ValidationRule) -> bool {
        self.0.contains(rule)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationRule> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ValidationRule> for ValidationSet {
    fn from_iter<I: IntoIterator<Item = ValidationRule>>(iter: I) -> Self {
        let mut set = ValidationSet::new();
        for rule in iter {
            set.insert(rule);
        }
        set
    }
}

/// A field as declared inside a document. Every attribute is optional so that
/// `extends` and composition can layer declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
}

impl FieldDef {
    #[must_use]
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type: Some(field_type),
            ..Self::default()
        }
    }

    /// Layer this declaration over `base`: attributes set here win, validation is
    /// the union with `base`'s rules first. The result no longer extends anything.
    #[must_use]
    pub fn overlay(&self, base: &FieldDef) -> FieldDef {
        let mut validation = base.validation.clone();
        validation.union(&self.validation);
        FieldDef {
            name: self.name.clone(),
            field_type: self.field_type.or(base.field_type),
            label: self.label.clone().or_else(|| base.label.clone()),
            placeholder: self.placeholder.clone().or_else(|| base.placeholder.clone()),
            help: self.help.clone().or_else(|| base.help.clone()),
            default: self.default.clone().or_else(|| base.default.clone()),
            validation,
            condition: self.condition.clone().or_else(|| base.condition.clone()),
            permission: self.permission.clone().or_else(|| base.permission.clone()),
            required: self.required.or(base.required),
            read_only: self.read_only.or(base.read_only),
            extends: None,
        }
    }
}

/// Gate on a runtime path, e.g. `form.kind == "business"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discriminator {
    pub path: String,
    pub equals: Value,
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} == {}", self.path, self.equals)
    }
}

/// Annotation left by a composition constituent that could only be decided at
/// enrichment time. All discriminators in `when` must match; `patch` is the
/// constituent's declaration, layered over the field only for requests where
/// they do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConditional {
    pub when: Vec<Discriminator>,
    pub patch: FieldDef,
}

impl RuntimeConditional {
    #[must_use]
    pub fn new(when: Vec<Discriminator>, def: &FieldDef) -> Self {
        Self {
            when,
            patch: FieldDef {
                extends: None,
                ..def.clone()
            },
        }
    }
}

/// A fully resolved and flattened field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub help: Option<String>,
    pub default: Option<Value>,
    pub validation: ValidationSet,
    pub condition: Option<String>,
    pub permission: Option<String>,
    pub required: bool,
    pub read_only: bool,
    pub conditionals: Vec<RuntimeConditional>,
    /// Introduced only by deferred constituents: hidden unless a gate matches.
    pub gated: bool,
}

impl Field {
    #[must_use]
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
            label: None,
            placeholder: None,
            help: None,
            default: None,
            validation: ValidationSet::new(),
            condition: None,
            permission: None,
            required: false,
            read_only: false,
            conditionals: Vec::new(),
            gated: false,
        }
    }

    /// Overwrite every scalar attribute `def` sets; union its validation.
    pub(crate) fn apply(&mut self, def: &FieldDef) {
        if let Some(t) = def.field_type {
            self.field_type = t;
        }
        if let Some(v) = &def.label {
            self.label = Some(v.clone());
        }
        if let Some(v) = &def.placeholder {
            self.placeholder = Some(v.clone());
        }
        if let Some(v) = &def.help {
            self.help = Some(v.clone());
        }
        if let Some(v) = &def.default {
            self.default = Some(v.clone());
        }
        if let Some(v) = &def.condition {
            self.condition = Some(v.clone());
        }
        if let Some(v) = &def.permission {
            self.permission = Some(v.clone());
        }
        if let Some(v) = def.required {
            self.required = v;
        }
        if let Some(v) = def.read_only {
            self.read_only = v;
        }
        self.validation.union(&def.validation);
    }
}

/// Per-request display state. Never persisted and never hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    pub visible: bool,
    pub editable: bool,
    pub required: bool,
    /// Id of the rule (or `condition`, `gate:<path>`, `permission:<token>`)
    /// that last changed this state.
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl Runtime {
    #[must_use]
    pub fn for_field(field: &Field) -> Self {
        Self {
            visible: true,
            editable: !field.read_only,
            required: field.required,
            reason: None,
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_family_is_compatible() {
        assert!(FieldType::Text.compatible_with(FieldType::Email));
        assert!(FieldType::Textarea.compatible_with(FieldType::Text));
        assert!(FieldType::Number.compatible_with(FieldType::Number));
        assert!(!FieldType::Text.compatible_with(FieldType::Number));
        assert!(!FieldType::Date.compatible_with(FieldType::DateTime));
    }

    #[test]
    fn field_type_names_round_trip() {
        for t in FieldType::ALL {
            assert_eq!(FieldType::from_name(t.as_str()), Some(t));
        }
        assert_eq!(FieldType::from_name("nope"), None);
    }

    #[test]
    fn validation_union_dedupes_and_keeps_order() {
        let mut a: ValidationSet = [ValidationRule::MinLength(1), ValidationRule::MaxLength(10)]
            .into_iter()
            .collect();
        let b: ValidationSet = [ValidationRule::MaxLength(10), ValidationRule::MaxLength(5)]
            .into_iter()
            .collect();
        a.union(&b);
        let rules: Vec<_> = a.iter().cloned().collect();
        assert_eq!(
            rules,
            vec![
                ValidationRule::MinLength(1),
                ValidationRule::MaxLength(10),
                ValidationRule::MaxLength(5),
            ]
        );
    }

    #[test]
    fn override_replaces_same_kind() {
        let mut set: ValidationSet = [ValidationRule::MaxLength(10), ValidationRule::Min(0.0)]
            .into_iter()
            .collect();
        set.override_with(ValidationRule::MaxLength(40));
        set.override_with(ValidationRule::Pattern("^[A-Z]".into()));
        let rules: Vec<_> = set.iter().cloned().collect();
        assert_eq!(
            rules,
            vec![
                ValidationRule::MaxLength(40),
                ValidationRule::Min(0.0),
                ValidationRule::Pattern("^[A-Z]".into()),
            ]
        );
    }

    #[test]
    fn overlay_prefers_local() {
        let base = FieldDef {
            label: Some("Base".into()),
            help: Some("base help".into()),
            validation: [ValidationRule::MinLength(1)].into_iter().collect(),
            ..FieldDef::new("base", FieldType::Text)
        };
        let local = FieldDef {
            name: "email".into(),
            field_type: Some(FieldType::Email),
            label: Some("Email".into()),
            validation: [ValidationRule::Format("email".into())].into_iter().collect(),
            extends: Some("#base".into()),
            ..FieldDef::default()
        };
        let merged = local.overlay(&base);
        assert_eq!(merged.name, "email");
        assert_eq!(merged.field_type, Some(FieldType::Email));
        assert_eq!(merged.label.as_deref(), Some("Email"));
        assert_eq!(merged.help.as_deref(), Some("base help"));
        assert_eq!(merged.validation.len(), 2);
        assert_eq!(merged.extends, None);
    }

    #[test]
    fn field_def_parses_from_json() {
        let def: FieldDef = serde_json::from_str(
            r#"{"name":"age","type":"number","required":true,
                "validation":[{"rule":"min","value":0},{"rule":"max","value":130}]}"#,
        )
        .unwrap();
        assert_eq!(def.field_type, Some(FieldType::Number));
        assert_eq!(def.required, Some(true));
        assert!(def.validation.contains(&ValidationRule::Max(130.0)));
    }

    #[test]
    fn runtime_defaults_follow_static_flags() {
        let mut field = Field::new("x", FieldType::Text);
        field.read_only = true;
        field.required = true;
        let rt = Runtime::for_field(&field);
        assert!(rt.visible);
        assert!(!rt.editable);
        assert!(rt.required);
    }
}
