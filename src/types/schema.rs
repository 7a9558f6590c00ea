use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::RuleEvaluationError;
use super::expr::Expr;
use super::field::{Discriminator, Field, FieldDef, Runtime};
use super::path_registry::PathRegistry;
use super::Value;

/// BLAKE3 digest of a document's canonical JSON form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Raw schema definition as owned by the schema store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub constants: BTreeMap<String, Value>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// One entry in a document's node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Field(FieldDef),
    Include { target: String },
    Composition { constituents: Vec<Constituent> },
}

/// A branch of a composition, optionally gated by a discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constituent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Discriminator>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl SchemaDocument {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            version: String::new(),
            kind: String::new(),
            constants: BTreeMap::new(),
            nodes: Vec::new(),
        }
    }

    /// Parse a document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed or unknown structure.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    #[must_use]
    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_owned();
        self
    }

    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_owned();
        self
    }

    #[must_use]
    pub fn constant(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.constants.insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn field(mut self, def: FieldDef) -> Self {
        self.nodes.push(Node::Field(def));
        self
    }

    #[must_use]
    pub fn include(mut self, target: &str) -> Self {
        self.nodes.push(Node::Include {
            target: target.to_owned(),
        });
        self
    }

    #[must_use]
    pub fn composition(mut self, constituents: Vec<Constituent>) -> Self {
        self.nodes.push(Node::Composition { constituents });
        self
    }

    /// Content hash of the canonical JSON encoding.
    ///
    /// # Errors
    ///
    /// Fails only if the document cannot be encoded as JSON.
    pub fn content_hash(&self) -> Result<ContentHash, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(ContentHash(*blake3::hash(&bytes).as_bytes()))
    }

    /// Top-level field declaration by name. Fragments never reach into includes
    /// or compositions.
    #[must_use]
    pub fn top_level_field(&self, name: &str) -> Option<&FieldDef> {
        self.nodes.iter().find_map(|n| match n {
            Node::Field(def) if def.name == name => Some(def),
            _ => None,
        })
    }
}

impl Constituent {
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { when: None, nodes }
    }

    #[must_use]
    pub fn when(mut self, path: &str, equals: impl Into<Value>) -> Self {
        self.when = Some(Discriminator {
            path: path.to_owned(),
            equals: equals.into(),
        });
        self
    }
}

/// Target of a pointer after resolving relative forms against the containing
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefKey {
    pub document: String,
    pub field: Option<String>,
}

impl RefKey {
    /// Parse `doc`, `doc#field` or `#field` (relative to `current`).
    ///
    /// Returns `None` for malformed pointers.
    #[must_use]
    pub fn parse(pointer: &str, current: &str) -> Option<RefKey> {
        let valid = |s: &str| {
            !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c == '#')
        };
        match pointer.split_once('#') {
            None if valid(pointer) => Some(RefKey {
                document: pointer.to_owned(),
                field: None,
            }),
            Some((doc, field)) if valid(field) && (doc.is_empty() || valid(doc)) => {
                let document = if doc.is_empty() { current } else { doc };
                Some(RefKey {
                    document: document.to_owned(),
                    field: Some(field.to_owned()),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}#{field}", self.document),
            None => write!(f, "{}", self.document),
        }
    }
}

/// A field `condition` parsed once at resolution time. `Err` holds the parse
/// error text.
pub(crate) type ParsedCondition = Option<Result<Expr, String>>;

/// Parsed conditions of one field: its own, then one per runtime conditional
/// (index-aligned with `Field::conditionals`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldConditions {
    pub(crate) base: ParsedCondition,
    pub(crate) gated: Vec<ParsedCondition>,
}

/// Reference-free, flattened schema. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchema {
    pub(crate) schema_id: String,
    pub(crate) version: String,
    pub(crate) kind: String,
    pub(crate) source_hash: ContentHash,
    pub(crate) dependencies: Vec<(String, ContentHash)>,
    pub(crate) fields: Vec<Field>,
    /// Index-aligned with `fields`.
    pub(crate) conditions: Vec<FieldConditions>,
    /// Paths read by field conditions and runtime gates.
    pub(crate) read_paths: PathRegistry,
}

fn parse_field_condition(src: Option<&str>, read_paths: &mut PathRegistry) -> ParsedCondition {
    src.map(|src| {
        let parsed = crate::parse::parse_condition(src).map_err(|e| e.to_string());
        if let Ok(expr) = &parsed {
            let mut paths = std::collections::BTreeSet::new();
            expr.collect_paths(&mut paths);
            for p in &paths {
                read_paths.register(p);
            }
        }
        parsed
    })
}

impl ResolvedSchema {
    pub(crate) fn new(
        schema_id: String,
        version: String,
        kind: String,
        source_hash: ContentHash,
        dependencies: Vec<(String, ContentHash)>,
        fields: Vec<Field>,
    ) -> Self {
        let mut read_paths = PathRegistry::new();
        let conditions = fields
            .iter()
            .map(|field| {
                let base = parse_field_condition(field.condition.as_deref(), &mut read_paths);
                let gated = field
                    .conditionals
                    .iter()
                    .map(|c| {
                        for gate in &c.when {
                            read_paths.register(&gate.path);
                        }
                        parse_field_condition(c.patch.condition.as_deref(), &mut read_paths)
                    })
                    .collect();
                FieldConditions { base, gated }
            })
            .collect();
        Self {
            schema_id,
            version,
            kind,
            source_hash,
            dependencies,
            fields,
            conditions,
            read_paths,
        }
    }

    #[must_use]
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Content hash of the root document this schema was built from.
    #[must_use]
    pub fn source_hash(&self) -> ContentHash {
        self.source_hash
    }

    /// `(document id, content hash)` of every other document that contributed.
    #[must_use]
    pub fn dependencies(&self) -> &[(String, ContentHash)] {
        &self.dependencies
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Context paths read by field conditions and runtime gates.
    #[must_use]
    pub fn read_paths(&self) -> &PathRegistry {
        &self.read_paths
    }
}

/// A resolved field together with its runtime state for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedField {
    pub field: Field,
    pub runtime: Runtime,
}

/// Non-fatal problem recorded while enriching a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A business rule was skipped because its condition was malformed or hit a
    /// type error.
    RuleSkipped(RuleEvaluationError),
    /// A field's attached condition could not be parsed or evaluated; the field
    /// stayed visible.
    ConditionSkipped { field: String, reason: String },
    /// A tenant override was dropped.
    OverrideDropped { field: String, reason: String },
    /// Tenant overrides could not be fetched; none were applied.
    OverridesUnavailable { reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::RuleSkipped(err) => write!(f, "{err}"),
            Diagnostic::ConditionSkipped { field, reason } => {
                write!(f, "condition on field '{field}' skipped: {reason}")
            }
            Diagnostic::OverrideDropped { field, reason } => {
                write!(f, "override for field '{field}' dropped: {reason}")
            }
            Diagnostic::OverridesUnavailable { reason } => {
                write!(f, "tenant overrides unavailable: {reason}")
            }
        }
    }
}

/// A schema with per-field runtime state computed for one request context.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSchema {
    pub(crate) schema_id: String,
    pub(crate) kind: String,
    pub(crate) source_hash: ContentHash,
    pub(crate) tenant_id: String,
    pub(crate) fields: Vec<EnrichedField>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl EnrichedSchema {
    #[must_use]
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn source_hash(&self) -> ContentHash {
        self.source_hash
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    #[must_use]
    pub fn fields(&self) -> &[EnrichedField] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&EnrichedField> {
        self.fields.iter().find(|f| f.field.name == name)
    }

    /// Fields currently visible, in schema order.
    pub fn visible_fields(&self) -> impl Iterator<Item = &EnrichedField> {
        self.fields.iter().filter(|f| f.runtime.visible)
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
