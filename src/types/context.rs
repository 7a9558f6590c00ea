use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::Value;

/// Map of dot-separated paths to [`Value`]s.
///
/// Supports nested paths like `"org.plan.tier"`. Used for request attributes and,
/// wrapped in [`FormData`], for already-known form values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    data: HashMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Value),
    Nested(HashMap<String, Node>),
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value at a dot-separated path. Creates intermediate nested maps as needed.
    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.insert(path, value.into());
        self
    }

    /// Insert a value at a dot-separated path (mutable reference version).
    pub fn insert(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        Self::insert_recursive(&mut self.data, &segments, value);
    }

    /// Look up a value by dot-separated path.
    /// Returns `None` if the path does not exist or points to a nested map.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments: Vec<&str> = path.split('.').collect();
        Self::get_recursive(&self.data, &segments)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn insert_recursive(map: &mut HashMap<String, Node>, segments: &[&str], value: Value) {
        match segments {
            [] => {}
            [last] => {
                map.insert((*last).to_owned(), Node::Leaf(value));
            }
            [first, rest @ ..] => {
                let entry = map
                    .entry((*first).to_owned())
                    .or_insert_with(|| Node::Nested(HashMap::new()));
                if let Node::Leaf(_) = entry {
                    *entry = Node::Nested(HashMap::new());
                }
                if let Node::Nested(nested) = entry {
                    Self::insert_recursive(nested, rest, value);
                }
            }
        }
    }

    fn get_recursive<'a>(map: &'a HashMap<String, Node>, segments: &[&str]) -> Option<&'a Value> {
        match segments {
            [] => None,
            [last] => match map.get(*last)? {
                Node::Leaf(v) => Some(v),
                Node::Nested(_) => None,
            },
            [first, rest @ ..] => match map.get(*first)? {
                Node::Nested(nested) => Self::get_recursive(nested, rest),
                Node::Leaf(_) => None,
            },
        }
    }
}

/// Partial form values known at request time, addressed as `form.<path>` in
/// conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    values: Attributes,
}

impl FormData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.values.insert(path, value.into());
        self
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }
}

/// How the caller is acting for this request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Standard,
    Elevated,
    Impersonating {
        subject: String,
    },
}

/// Per-request identity, tenancy and authorization facts.
///
/// Never cached and never logged verbatim: the `Debug` impl prints only the tenant,
/// mode and a fingerprint of the permission/role sets.
#[derive(Clone, Default)]
pub struct RequestContext {
    identity: String,
    tenant_id: String,
    permissions: BTreeSet<String>,
    roles: BTreeSet<String>,
    mode: AccessMode,
    attributes: Attributes,
}

impl RequestContext {
    #[must_use]
    pub fn new(identity: &str, tenant_id: &str) -> Self {
        Self {
            identity: identity.to_owned(),
            tenant_id: tenant_id.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn permission(mut self, token: &str) -> Self {
        self.permissions.insert(token.to_owned());
        self
    }

    #[must_use]
    pub fn role(mut self, role: &str) -> Self {
        self.roles.insert(role.to_owned());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn attribute(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(path, value.into());
        self
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    #[must_use]
    pub fn has_permission(&self, token: &str) -> bool {
        self.permissions.contains(token)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn access_mode(&self) -> &AccessMode {
        &self.mode
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Elevated and impersonated requests must never read or populate shared
    /// enrichment caches.
    #[must_use]
    pub fn bypasses_cache(&self) -> bool {
        !matches!(self.mode, AccessMode::Standard)
    }

    /// BLAKE3 digest over the sorted permission and role sets.
    #[must_use]
    pub fn permission_fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for (tag, set) in [(b'p', &self.permissions), (b'r', &self.roles)] {
            hasher.update(&[tag]);
            hasher.update(&(set.len() as u64).to_le_bytes());
            for item in set {
                hasher.update(&(item.len() as u64).to_le_bytes());
                hasher.update(item.as_bytes());
            }
        }
        *hasher.finalize().as_bytes()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fp = self.permission_fingerprint();
        f.debug_struct("RequestContext")
            .field("tenant_id", &self.tenant_id)
            .field("mode", &mode_label(&self.mode))
            .field("fingerprint", &short_hex(&fp))
            .finish_non_exhaustive()
    }
}

fn mode_label(mode: &AccessMode) -> &'static str {
    match mode {
        AccessMode::Standard => "standard",
        AccessMode::Elevated => "elevated",
        AccessMode::Impersonating { .. } => "impersonating",
    }
}

pub(crate) fn short_hex(bytes: &[u8]) -> String {
    use fmt::Write;
    bytes.iter().take(8).fold(String::with_capacity(16), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
