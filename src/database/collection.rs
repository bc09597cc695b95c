use super::StoreError;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Outcome of a bulk insert. Documents whose key already existed (or
/// appeared twice in the same batch) count as replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertManyResult {
    pub inserted: usize,
    pub replaced: usize,
}

/// A named set of JSON documents.
#[derive(Clone)]
pub struct Collection {
    name: String,
    tree: sled::Tree,
}

impl Collection {
    pub(crate) fn new(name: &str, tree: sled::Tree) -> Self {
        Self {
            name: name.to_string(),
            tree,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write every document in one atomic batch.
    pub fn insert_many(&self, docs: &[Value]) -> Result<InsertManyResult, StoreError> {
        let mut batch = sled::Batch::default();
        let mut result = InsertManyResult::default();
        let mut seen = HashSet::with_capacity(docs.len());

        for doc in docs {
            let key = document_key(doc)?;
            let bytes = serde_json::to_vec(doc)?;
            if self.tree.contains_key(&key)? || !seen.insert(key.clone()) {
                result.replaced += 1;
            } else {
                result.inserted += 1;
            }
            batch.insert(key, bytes);
        }

        self.tree.apply_batch(batch)?;
        Ok(result)
    }

    /// Write one document; returns true when it replaced an existing one.
    pub fn insert_one(&self, doc: &Value) -> Result<bool, StoreError> {
        let key = document_key(doc)?;
        let previous = self.tree.insert(key, serde_json::to_vec(doc)?)?;
        Ok(previous.is_some())
    }

    /// Every document, ordered by key.
    pub fn find_all(&self) -> Result<Vec<Value>, StoreError> {
        self.tree
            .iter()
            .values()
            .map(|bytes| -> Result<Value, StoreError> { Ok(serde_json::from_slice(&bytes?)?) })
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains_id(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tree.contains_key(id.as_bytes())?)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.tree.clear()?;
        Ok(())
    }
}

/// The document's `id` as a string, when it has a string or numeric one.
pub fn document_id(doc: &Value) -> Option<String> {
    match doc.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Documents without an id are keyed by the digest of their content so that
// loading the same fixture twice still lands on the same key.
fn document_key(doc: &Value) -> Result<Vec<u8>, StoreError> {
    if !doc.is_object() {
        return Err(StoreError::NotAnObject(doc.to_string()));
    }

    match document_id(doc) {
        Some(id) => Ok(id.into_bytes()),
        None => {
            let bytes = serde_json::to_vec(doc)?;
            Ok(format!("~{}", blake3::hash(&bytes).to_hex()).into_bytes())
        }
    }
}
