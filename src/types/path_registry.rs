use std::collections::BTreeMap;

/// Context paths read by a rule set or a schema's field conditions, each with a
/// stable index in sorted order.
///
/// Built during compilation. The enriched-schema cache key hashes the values found
/// at these paths, so two requests that differ only in attributes nothing reads
/// share an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRegistry {
    paths: BTreeMap<String, usize>,
}

impl PathRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a path. Registering a path twice is a no-op.
    pub(crate) fn register(&mut self, path: &str) {
        if self.paths.contains_key(path) {
            return;
        }
        self.paths.insert(path.to_owned(), 0);
        for (i, idx) in self.paths.values_mut().enumerate() {
            *idx = i;
        }
    }

    /// Merge every path of `other` into this registry.
    pub(crate) fn extend(&mut self, other: &PathRegistry) {
        for path in other.paths.keys() {
            self.register(path);
        }
    }

    /// Index of `path` in sorted order.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<usize> {
        self.paths.get(path).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Registered paths in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let mut reg = PathRegistry::new();
        reg.register("form.kind");
        assert_eq!(reg.get("form.kind"), Some(0));
    }

    #[test]
    fn duplicate_register_is_noop() {
        let mut reg = PathRegistry::new();
        reg.register("form.kind");
        reg.register("form.kind");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn indices_follow_sorted_order() {
        let mut reg = PathRegistry::new();
        reg.register("tenant.id");
        reg.register("form.b");
        reg.register("form.a");
        assert_eq!(reg.get("form.a"), Some(0));
        assert_eq!(reg.get("form.b"), Some(1));
        assert_eq!(reg.get("tenant.id"), Some(2));
        assert_eq!(reg.iter().collect::<Vec<_>>(), ["form.a", "form.b", "tenant.id"]);
    }

    #[test]
    fn extend_merges() {
        let mut a = PathRegistry::new();
        a.register("x");
        let mut b = PathRegistry::new();
        b.register("x");
        b.register("y");
        a.extend(&b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn empty_registry() {
        let reg = PathRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.get("missing"), None);
    }
}
