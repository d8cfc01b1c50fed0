use crate::document::{DocumentPath, FieldMap, StoredDocument};
use serde_json::Value;
use thiserror::Error;

pub mod memory;

/// Largest number of document writes a single atomic batch may carry,
/// mirroring the backing store's multi-document write limit.
pub const MAX_ATOMIC_BATCH_OPS: usize = 500;

/// Equality-style predicates supported by indexed queries.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Field equals the given value.
    Eq(Value),
    /// Field equals any of the given values.
    In(Vec<Value>),
}

/// Single field predicate inside a query.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
}

/// Indexed query over one collection, always carrying an explicit result cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: String,
    filters: Vec<FieldFilter>,
    limit: usize,
}

impl Query {
    /// Starts a query over `collection` capped at `limit` results.
    pub fn collection(collection: impl Into<String>, limit: usize) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            limit,
        }
    }

    /// Adds an equality predicate.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            op: FilterOp::Eq(value.into()),
        });
        self
    }

    /// Adds a membership predicate.
    pub fn where_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            op: FilterOp::In(values),
        });
        self
    }

    /// Lowers the result cap to `limit` when it is tighter than the current one.
    pub fn clamp_limit(mut self, limit: usize) -> Self {
        self.limit = self.limit.min(limit);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Provenance stamp attached to a cascade-authored write. The store upserts
/// the entry under the document's provenance map keyed by `cascade_id`, so
/// independent cascades never clobber each other's stamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceTag {
    pub cascade_id: String,
    pub written_at_ms: u64,
    pub fields_digest: String,
}

/// Payload of a single write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    /// Replaces the whole document. Any provenance entries other than the
    /// attached tag are discarded with the rest of the old fields.
    Set { fields: FieldMap },
    /// Replaces each named top-level field wholly; unrelated fields survive.
    Merge { fields: FieldMap },
    /// Removes the document.
    Delete,
}

/// One document write, optionally fenced on the generation observed at read
/// time and optionally stamped with cascade provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub path: DocumentPath,
    pub payload: WritePayload,
    pub tag: Option<ProvenanceTag>,
    pub fence: Option<u64>,
}

impl WriteOp {
    /// Full-document replacement.
    pub fn set(path: DocumentPath, fields: FieldMap) -> Self {
        Self {
            path,
            payload: WritePayload::Set { fields },
            tag: None,
            fence: None,
        }
    }

    /// Field-level merge write.
    pub fn merge(path: DocumentPath, fields: FieldMap) -> Self {
        Self {
            path,
            payload: WritePayload::Merge { fields },
            tag: None,
            fence: None,
        }
    }

    /// Document deletion.
    pub fn delete(path: DocumentPath) -> Self {
        Self {
            path,
            payload: WritePayload::Delete,
            tag: None,
            fence: None,
        }
    }

    /// Attaches a provenance tag.
    pub fn with_tag(mut self, tag: ProvenanceTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Fences the write on the generation observed at read time.
    pub fn with_fence(mut self, generation: u64) -> Self {
        self.fence = Some(generation);
        self
    }
}

/// Atomic multi-document write, bounded by [`MAX_ATOMIC_BATCH_OPS`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an op, refusing once the atomic limit is reached.
    pub fn push(&mut self, op: WriteOp) -> Result<(), StoreError> {
        if self.ops.len() >= MAX_ATOMIC_BATCH_OPS {
            return Err(StoreError::BatchTooLarge {
                limit: MAX_ATOMIC_BATCH_OPS,
            });
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Receipt returned by a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub ops_applied: usize,
}

/// Errors surfaced by document store implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("batch exceeds the atomic write limit of {limit} ops")]
    BatchTooLarge { limit: usize },
    #[error("fencing conflict on {path}: expected generation {expected}, found {found}")]
    FenceConflict {
        path: DocumentPath,
        expected: u64,
        found: u64,
    },
    #[error("query limit must be at least 1")]
    UnboundedQuery,
    #[error("store backend failure: {detail}")]
    Backend { detail: String },
}

/// Storage abstraction consumed by the guarded executor. Implementations must
/// provide per-document generation stamping and all-or-nothing batch commits;
/// fences are validated against generations before anything is applied.
pub trait DocumentStore {
    /// Point read. Returns `None` when the document does not exist.
    fn get(&self, path: &DocumentPath) -> Result<Option<StoredDocument>, StoreError>;

    /// Runs an indexed query, returning at most `query.limit()` documents in
    /// ascending document-id order. A zero limit is refused, never treated as
    /// an unbounded scan.
    fn run_query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    /// Commits a batch atomically: every fence is validated first, then every
    /// op is applied, and each touched document's generation advances by one.
    fn commit_batch(&mut self, batch: WriteBatch) -> Result<BatchReceipt, StoreError>;
}
