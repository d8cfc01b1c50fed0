use super::{
    BatchReceipt, DocumentStore, FieldFilter, FilterOp, Query, StoreError, WriteBatch, WriteOp,
    WritePayload, MAX_ATOMIC_BATCH_OPS,
};
use crate::document::{DocumentPath, FieldMap, StoredDocument, PROVENANCE_FIELD};
use crate::store::ProvenanceTag;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// In-memory reference store with generation stamping and atomic batch
/// commits. Iteration order is deterministic (documents sort by path), which
/// keeps query results and tests stable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: BTreeMap<DocumentPath, FieldMap>,
    // Generations survive deletion so a recreated document never reuses one.
    generations: BTreeMap<DocumentPath, u64>,
    commits: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document directly, bypassing guards. Intended for test setup
    /// and for mirroring the upstream source-of-truth collections.
    pub fn seed(&mut self, path: DocumentPath, fields: FieldMap) {
        let generation = self.next_generation(&path);
        self.generations.insert(path.clone(), generation);
        self.documents.insert(path, fields);
    }

    /// Number of batch commits applied so far.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn next_generation(&self, path: &DocumentPath) -> u64 {
        self.generations.get(path).copied().unwrap_or(0) + 1
    }

    fn current_generation(&self, path: &DocumentPath) -> u64 {
        if self.documents.contains_key(path) {
            self.generations.get(path).copied().unwrap_or(0)
        } else {
            0
        }
    }

    fn matches(fields: &FieldMap, filter: &FieldFilter) -> bool {
        let current = fields.get(&filter.field);
        match &filter.op {
            FilterOp::Eq(expected) => current == Some(expected),
            FilterOp::In(candidates) => {
                current.is_some_and(|value| candidates.iter().any(|candidate| candidate == value))
            }
        }
    }

    fn apply_op(&mut self, op: WriteOp) {
        let WriteOp {
            path, payload, tag, ..
        } = op;
        match payload {
            WritePayload::Set { fields } => {
                let mut fields = fields;
                if let Some(tag) = tag {
                    stamp_provenance(&mut fields, &tag);
                }
                let generation = self.next_generation(&path);
                self.generations.insert(path.clone(), generation);
                self.documents.insert(path, fields);
            }
            WritePayload::Merge { fields } => {
                let generation = self.next_generation(&path);
                self.generations.insert(path.clone(), generation);
                let target = self.documents.entry(path).or_insert_with(Map::new);
                for (name, value) in fields {
                    target.insert(name, value);
                }
                if let Some(tag) = tag {
                    stamp_provenance(target, &tag);
                }
            }
            WritePayload::Delete => {
                if self.documents.remove(&path).is_some() {
                    let generation = self.next_generation(&path);
                    self.generations.insert(path, generation);
                }
            }
        }
    }
}

/// Upserts the cascade's entry in the document's provenance map without
/// touching entries owned by other cascades.
pub fn stamp_provenance(fields: &mut FieldMap, tag: &ProvenanceTag) {
    let entry = json!({
        "written_at_ms": tag.written_at_ms,
        "fields_digest": tag.fields_digest,
    });
    match fields.get_mut(PROVENANCE_FIELD) {
        Some(Value::Object(map)) => {
            map.insert(tag.cascade_id.clone(), entry);
        }
        _ => {
            let mut map = Map::new();
            map.insert(tag.cascade_id.clone(), entry);
            fields.insert(PROVENANCE_FIELD.to_string(), Value::Object(map));
        }
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &DocumentPath) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self.documents.get(path).map(|fields| StoredDocument {
            path: path.clone(),
            fields: fields.clone(),
            generation: self.current_generation(path),
        }))
    }

    fn run_query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        if query.limit() == 0 {
            return Err(StoreError::UnboundedQuery);
        }
        let mut results = Vec::new();
        for (path, fields) in &self.documents {
            if path.collection() != query.collection_name() {
                continue;
            }
            if !query
                .filters()
                .iter()
                .all(|filter| Self::matches(fields, filter))
            {
                continue;
            }
            results.push(StoredDocument {
                path: path.clone(),
                fields: fields.clone(),
                generation: self.current_generation(path),
            });
            if results.len() >= query.limit() {
                break;
            }
        }
        Ok(results)
    }

    fn commit_batch(&mut self, batch: WriteBatch) -> Result<BatchReceipt, StoreError> {
        if batch.len() > MAX_ATOMIC_BATCH_OPS {
            return Err(StoreError::BatchTooLarge {
                limit: MAX_ATOMIC_BATCH_OPS,
            });
        }
        // Validate every fence before applying anything so a conflict leaves
        // the batch entirely unapplied.
        for op in batch.ops() {
            if let Some(expected) = op.fence {
                let found = self.current_generation(&op.path);
                if found != expected {
                    return Err(StoreError::FenceConflict {
                        path: op.path.clone(),
                        expected,
                        found,
                    });
                }
            }
        }
        let ops = batch.into_ops();
        let applied = ops.len();
        for op in ops {
            self.apply_op(op);
        }
        self.commits += 1;
        Ok(BatchReceipt {
            ops_applied: applied,
        })
    }
}
