use crate::catalog::ReferenceDescriptor;
use std::collections::HashMap;

/// Per-session, append-only record of the references a generation used.
///
/// Entries are never removed or overwritten: the first descriptor stored for
/// an id stays for the lifetime of the session. Iteration follows insertion
/// order so the encoder emits import rows deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceRegistry {
    order: Vec<String>,
    entries: HashMap<String, ReferenceDescriptor>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, id: &str) -> Option<&ReferenceDescriptor> {
        self.entries.get(id)
    }

    /// Insert `descriptor` under `id` unless an entry already exists.
    /// Returns true when the entry was added.
    pub fn ensure(&mut self, id: impl Into<String>, descriptor: ReferenceDescriptor) -> bool {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.order.push(id.clone());
        self.entries.insert(id, descriptor);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReferenceDescriptor)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|descriptor| (id.as_str(), descriptor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(path: &str) -> ReferenceDescriptor {
        ReferenceDescriptor {
            id: path.to_string(),
            chunks: Vec::new(),
            name: "Counter".to_string(),
            is_async: true,
        }
    }

    #[test]
    fn test_first_writer_wins() {
        let mut registry = ReferenceRegistry::new();

        assert!(registry.ensure("__client.Counter", descriptor("/first.js")));
        assert!(!registry.ensure("__client.Counter", descriptor("/second.js")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("__client.Counter").unwrap().id, "/first.js");
    }

    #[test]
    fn test_resolve_missing() {
        let registry = ReferenceRegistry::new();
        assert!(registry.resolve("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut registry = ReferenceRegistry::new();
        registry.ensure("z", descriptor("/z.js"));
        registry.ensure("a", descriptor("/a.js"));
        registry.ensure("m", descriptor("/m.js"));

        let ids: Vec<&str> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }
}
