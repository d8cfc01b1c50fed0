use serde_json::{Map, Value};

/// Field payload of a document: a JSON object keyed by top-level field name.
pub type FieldMap = Map<String, Value>;

/// Reserved top-level field holding the per-cascade provenance map.
pub const PROVENANCE_FIELD: &str = "_provenance";

/// Fully qualified location of a document inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: String,
    document_id: String,
}

impl DocumentPath {
    /// Creates a path from a collection and document id.
    pub fn new(collection: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            document_id: document_id.into(),
        }
    }

    /// Collection segment of the path.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Document id segment of the path.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Renders the path as `collection/document_id` for diagnostics.
    pub fn render(&self) -> String {
        format!("{}/{}", self.collection, self.document_id)
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.document_id)
    }
}

/// Document returned by store reads, carrying the generation stamped by the
/// last committed write. The generation doubles as a fencing token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub path: DocumentPath,
    pub fields: FieldMap,
    pub generation: u64,
}

impl StoredDocument {
    /// Returns a top-level field value, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a top-level field as a string slice, if present and a string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Returns a top-level field as an f64, if present and numeric.
    pub fn num_field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }
}

/// Deep structural equality between two optional field values. `Value`
/// equality already compares arrays and objects structurally; absent fields
/// compare equal only to absent fields.
pub fn fields_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Returns true when every named field carries the same value in `proposed`
/// as in `current` (deep comparison, absent counts as different from present).
pub fn covers_fields(current: &FieldMap, proposed: &FieldMap) -> bool {
    proposed
        .iter()
        .all(|(name, value)| fields_equal(current.get(name), Some(value)))
}
