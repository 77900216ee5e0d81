use serde::{Deserialize, Serialize};

/// Export name of the reference registered when no catalog is configured
pub const DEFAULT_EXPORT_NAME: &str = "Counter";
pub const DEFAULT_REFERENCE_ID: &str = "__client.Counter";
pub const DEFAULT_REFERENCE_PATH: &str = "/g/test.js";

/// One independently loadable unit of client-side behavior.
///
/// Immutable once built: the catalog hands out clones and the registry
/// stores descriptors derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    /// Stable identifier the registry is keyed by
    pub id: String,
    /// Name generated markup uses to refer to the component
    pub export_name: String,
    /// Resource the client imports the component from
    pub path: String,
    #[serde(default)]
    pub chunks: Vec<String>,
}

impl ComponentReference {
    pub fn new(id: impl Into<String>, export_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            export_name: export_name.into(),
            path: path.into(),
            chunks: Vec::new(),
        }
    }

    /// Metadata the client fetches the component with. Every reference is
    /// loaded asynchronously.
    pub fn descriptor(&self) -> ReferenceDescriptor {
        ReferenceDescriptor {
            id: self.path.clone(),
            name: self.export_name.clone(),
            chunks: self.chunks.clone(),
            is_async: true,
        }
    }
}

/// Serialized form of a registry entry: `{"id","chunks","name","async"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub id: String,
    pub chunks: Vec<String>,
    pub name: String,
    #[serde(rename = "async")]
    pub is_async: bool,
}

/// Fixed set of references the sandbox may resolve by name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceCatalog {
    entries: Vec<ComponentReference>,
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the bundled `Counter` test component
    pub fn with_defaults() -> Self {
        Self::new().with_reference(ComponentReference::new(
            DEFAULT_REFERENCE_ID,
            DEFAULT_EXPORT_NAME,
            DEFAULT_REFERENCE_PATH,
        ))
    }

    pub fn with_reference(mut self, reference: ComponentReference) -> Self {
        self.insert(reference);
        self
    }

    /// Add a reference; a later entry with the same export name replaces the earlier one
    pub fn insert(&mut self, reference: ComponentReference) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.export_name == reference.export_name)
        {
            Some(existing) => *existing = reference,
            None => self.entries.push(reference),
        }
    }

    pub fn get(&self, export_name: &str) -> Option<&ComponentReference> {
        self.entries.iter().find(|entry| entry.export_name == export_name)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ComponentReference> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn contains(&self, export_name: &str) -> bool {
        self.get(export_name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentReference> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ComponentReference> for ReferenceCatalog {
    fn from_iter<I: IntoIterator<Item = ComponentReference>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for reference in iter {
            catalog.insert(reference);
        }
        catalog
    }
}
