//! Binary snapshots of resolved schemas.
//!
//! A [`ResolvedSchema`] can be written to a compact, checksummed blob and read
//! back by a later process to warm the resolved cache
//! ([`CacheManager::warm_resolved`](crate::CacheManager::warm_resolved)). The
//! format is a 32-byte fixed header followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"FWRS"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. If it does not,
//! decoding fails immediately with [`DeserializeError::IncompatibleVersion`].
//! The engine version is informational only.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ContentHash, Discriminator, Field, FieldDef, FieldType, ResolvedSchema,
    RuntimeConditional, ValidationRule, ValidationSet, Value,
};

const MAGIC: &[u8; 4] = b"FWRS";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

/// Errors that can occur when writing a snapshot.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode schema: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("I/O error during serialization: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when reading a snapshot.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a schema snapshot: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during deserialization: {0}")]
    Io(#[from] std::io::Error),
}

// Mirror types: `Value` is untagged and `ValidationRule` adjacently tagged,
// neither of which bincode can decode without a self-describing format.

#[derive(Debug, Serialize, Deserialize)]
struct SerializedSchema {
    metadata: SchemaMetadata,
    schema_id: String,
    version: String,
    kind: String,
    source_hash: [u8; 32],
    dependencies: Vec<(String, [u8; 32])>,
    fields: Vec<SerializedField>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaMetadata {
    field_count: usize,
    dependency_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedField {
    name: String,
    field_type: FieldType,
    label: Option<String>,
    placeholder: Option<String>,
    help: Option<String>,
    default: Option<SerializedValue>,
    validation: Vec<SerializedRule>,
    condition: Option<String>,
    permission: Option<String>,
    required: bool,
    read_only: bool,
    conditionals: Vec<SerializedConditional>,
    gated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedConditional {
    when: Vec<(String, SerializedValue)>,
    patch: SerializedPatch,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedPatch {
    name: String,
    field_type: Option<FieldType>,
    label: Option<String>,
    placeholder: Option<String>,
    help: Option<String>,
    default: Option<SerializedValue>,
    validation: Vec<SerializedRule>,
    condition: Option<String>,
    permission: Option<String>,
    required: Option<bool>,
    read_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SerializedValue>),
}

#[derive(Debug, Serialize, Deserialize)]
enum SerializedRule {
    MinLength(u32),
    MaxLength(u32),
    Min(f64),
    Max(f64),
    Pattern(String),
    Format(String),
    OneOf(Vec<SerializedValue>),
    MinItems(u32),
    MaxItems(u32),
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

fn serialize_value(value: &Value) -> SerializedValue {
    match value {
        Value::Null => SerializedValue::Null,
        Value::Bool(v) => SerializedValue::Bool(*v),
        Value::Int(v) => SerializedValue::Int(*v),
        Value::Float(v) => SerializedValue::Float(*v),
        Value::String(v) => SerializedValue::Str(v.clone()),
        Value::List(items) => SerializedValue::List(items.iter().map(serialize_value).collect()),
    }
}

fn deserialize_value(value: SerializedValue) -> Value {
    match value {
        SerializedValue::Null => Value::Null,
        SerializedValue::Bool(v) => Value::Bool(v),
        SerializedValue::Int(v) => Value::Int(v),
        SerializedValue::Float(v) => Value::Float(v),
        SerializedValue::Str(v) => Value::String(v),
        SerializedValue::List(items) => {
            Value::List(items.into_iter().map(deserialize_value).collect())
        }
    }
}

fn serialize_rule(rule: &ValidationRule) -> SerializedRule {
    match rule {
        ValidationRule::MinLength(n) => SerializedRule::MinLength(*n),
        ValidationRule::MaxLength(n) => SerializedRule::MaxLength(*n),
        ValidationRule::Min(n) => SerializedRule::Min(*n),
        ValidationRule::Max(n) => SerializedRule::Max(*n),
        ValidationRule::Pattern(p) => SerializedRule::Pattern(p.clone()),
        ValidationRule::Format(f) => SerializedRule::Format(f.clone()),
        ValidationRule::OneOf(vs) => SerializedRule::OneOf(vs.iter().map(serialize_value).collect()),
        ValidationRule::MinItems(n) => SerializedRule::MinItems(*n),
        ValidationRule::MaxItems(n) => SerializedRule::MaxItems(*n),
    }
}

fn deserialize_rule(rule: SerializedRule) -> ValidationRule {
    match rule {
        SerializedRule::MinLength(n) => ValidationRule::MinLength(n),
        SerializedRule::MaxLength(n) => ValidationRule::MaxLength(n),
        SerializedRule::Min(n) => ValidationRule::Min(n),
        SerializedRule::Max(n) => ValidationRule::Max(n),
        SerializedRule::Pattern(p) => ValidationRule::Pattern(p),
        SerializedRule::Format(f) => ValidationRule::Format(f),
        SerializedRule::OneOf(vs) => {
            ValidationRule::OneOf(vs.into_iter().map(deserialize_value).collect())
        }
        SerializedRule::MinItems(n) => ValidationRule::MinItems(n),
        SerializedRule::MaxItems(n) => ValidationRule::MaxItems(n),
    }
}

// ---------------------------------------------------------------------------
// Field conversion
// ---------------------------------------------------------------------------

fn serialize_field(field: &Field) -> SerializedField {
    SerializedField {
        name: field.name.clone(),
        field_type: field.field_type,
        label: field.label.clone(),
        placeholder: field.placeholder.clone(),
        help: field.help.clone(),
        default: field.default.as_ref().map(serialize_value),
        validation: field.validation.iter().map(serialize_rule).collect(),
        condition: field.condition.clone(),
        permission: field.permission.clone(),
        required: field.required,
        read_only: field.read_only,
        conditionals: field
            .conditionals
            .iter()
            .map(|c| SerializedConditional {
                when: c
                    .when
                    .iter()
                    .map(|d| (d.path.clone(), serialize_value(&d.equals)))
                    .collect(),
                patch: serialize_patch(&c.patch),
            })
            .collect(),
        gated: field.gated,
    }
}

fn deserialize_field(ser: SerializedField) -> Field {
    Field {
        name: ser.name,
        field_type: ser.field_type,
        label: ser.label,
        placeholder: ser.placeholder,
        help: ser.help,
        default: ser.default.map(deserialize_value),
        validation: ser
            .validation
            .into_iter()
            .map(deserialize_rule)
            .collect::<ValidationSet>(),
        condition: ser.condition,
        permission: ser.permission,
        required: ser.required,
        read_only: ser.read_only,
        conditionals: ser
            .conditionals
            .into_iter()
            .map(|c| RuntimeConditional {
                when: c
                    .when
                    .into_iter()
                    .map(|(path, equals)| Discriminator {
                        path,
                        equals: deserialize_value(equals),
                    })
                    .collect(),
                patch: deserialize_patch(c.patch),
            })
            .collect(),
        gated: ser.gated,
    }
}

fn serialize_patch(def: &FieldDef) -> SerializedPatch {
    SerializedPatch {
        name: def.name.clone(),
        field_type: def.field_type,
        label: def.label.clone(),
        placeholder: def.placeholder.clone(),
        help: def.help.clone(),
        default: def.default.as_ref().map(serialize_value),
        validation: def.validation.iter().map(serialize_rule).collect(),
        condition: def.condition.clone(),
        permission: def.permission.clone(),
        required: def.required,
        read_only: def.read_only,
    }
}

fn deserialize_patch(ser: SerializedPatch) -> FieldDef {
    FieldDef {
        name: ser.name,
        field_type: ser.field_type,
        label: ser.label,
        placeholder: ser.placeholder,
        help: ser.help,
        default: ser.default.map(deserialize_value),
        validation: ser.validation.into_iter().map(deserialize_rule).collect(),
        condition: ser.condition,
        permission: ser.permission,
        required: ser.required,
        read_only: ser.read_only,
        extends: None,
    }
}

fn schema_to_serialized(schema: &ResolvedSchema) -> SerializedSchema {
    SerializedSchema {
        metadata: SchemaMetadata {
            field_count: schema.fields.len(),
            dependency_count: schema.dependencies.len(),
        },
        schema_id: schema.schema_id.clone(),
        version: schema.version.clone(),
        kind: schema.kind.clone(),
        source_hash: schema.source_hash.0,
        dependencies: schema
            .dependencies
            .iter()
            .map(|(id, hash)| (id.clone(), hash.0))
            .collect(),
        fields: schema.fields.iter().map(serialize_field).collect(),
    }
}

fn serialized_to_schema(ser: SerializedSchema) -> Result<ResolvedSchema, DeserializeError> {
    validate(&ser)?;
    Ok(ResolvedSchema::new(
        ser.schema_id,
        ser.version,
        ser.kind,
        ContentHash(ser.source_hash),
        ser.dependencies
            .into_iter()
            .map(|(id, hash)| (id, ContentHash(hash)))
            .collect(),
        ser.fields.into_iter().map(deserialize_field).collect(),
    ))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(ser: &SerializedSchema) -> Result<(), DeserializeError> {
    if ser.metadata.field_count != ser.fields.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} fields but payload has {}",
            ser.metadata.field_count,
            ser.fields.len()
        )));
    }
    if ser.metadata.dependency_count != ser.dependencies.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} dependencies but payload has {}",
            ser.metadata.dependency_count,
            ser.dependencies.len()
        )));
    }
    if ser.schema_id.is_empty() {
        return Err(DeserializeError::Validation("empty schema id".to_owned()));
    }

    let mut names = HashSet::new();
    for field in &ser.fields {
        if !names.insert(field.name.as_str()) {
            return Err(DeserializeError::Validation(format!(
                "duplicate field '{}'",
                field.name
            )));
        }
        if field.gated && field.conditionals.is_empty() {
            return Err(DeserializeError::Validation(format!(
                "gated field '{}' has no gates",
                field.name
            )));
        }
    }

    let mut deps = HashSet::new();
    for (id, _) in &ser.dependencies {
        if id == &ser.schema_id || !deps.insert(id.as_str()) {
            return Err(DeserializeError::Validation(format!(
                "invalid dependency '{id}'"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) {
    let hash = blake3::hash(payload);
    let hash_bytes = hash.as_bytes();

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    #[allow(clippy::cast_possible_truncation)] // payload will never exceed 4 GiB
    let payload_len = payload.len() as u32;
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash_bytes[..16]);
}

#[allow(clippy::cast_possible_truncation)] // HEADER_SIZE is 32, always fits in u32
fn read_header(bytes: &[u8]) -> Result<(u16, u32, [u8; 16]), DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE as u32,
            actual: bytes.len(),
        });
    }

    if &bytes[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }

    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    // bytes[6..8] engine version, bytes[8..12] flags
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&bytes[16..32]);

    Ok((format_version, payload_len, hash))
}

// ---------------------------------------------------------------------------
// Encode/decode
// ---------------------------------------------------------------------------

fn encode(schema: &ResolvedSchema) -> Result<Vec<u8>, SerializeError> {
    let serialized = schema_to_serialized(schema);
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode(bytes: &[u8]) -> Result<ResolvedSchema, DeserializeError> {
    let (format_version, payload_len, stored_hash) = read_header(bytes)?;

    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }

    let payload_end = HEADER_SIZE + payload_len as usize;
    if bytes.len() < payload_end {
        return Err(DeserializeError::LengthMismatch {
            expected: payload_len,
            actual: bytes.len() - HEADER_SIZE,
        });
    }
    let payload = &bytes[HEADER_SIZE..payload_end];

    if blake3::hash(payload).as_bytes()[..16] != stored_hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (serialized, _): (SerializedSchema, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;

    serialized_to_schema(serialized)
}

impl ResolvedSchema {
    /// Encode this schema as a checksummed snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError::Encode`] if bincode encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        encode(self)
    }

    /// Decode a snapshot produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns a [`DeserializeError`] for foreign, truncated, corrupted or
    /// inconsistent blobs.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeserializeError> {
        decode(bytes)
    }

    /// # Errors
    ///
    /// As [`to_bytes`](Self::to_bytes), plus [`SerializeError::Io`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SerializeError> {
        std::fs::write(path, encode(self)?)?;
        Ok(())
    }

    /// # Errors
    ///
    /// As [`from_bytes`](Self::from_bytes), plus [`DeserializeError::Io`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeserializeError> {
        let bytes = std::fs::read(path)?;
        decode(&bytes)
    }
}
