use std::collections::HashMap;

use crate::tensor::Tensor;

/// Free-form string metadata stored in a safetensors header.
pub type HeaderMetadata = HashMap<String, String>;

/// Ordered mapping from tensor key to tensor.
///
/// Keys are unique. Iteration follows insertion order; replacing an existing
/// key keeps its original position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Checkpoint {
    order: Vec<String>,
    tensors: HashMap<String, Tensor>,
    metadata: Option<HeaderMetadata>,
}

impl Checkpoint {
    /// Create an empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.tensors.get(key)
    }

    /// Insert a tensor, returning the previous value for `key` if any.
    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        let key = key.into();
        let previous = self.tensors.insert(key.clone(), tensor);
        if previous.is_none() {
            self.order.push(key);
        }
        previous
    }

    /// Insert only if `key` is not already present. Returns `true` on insert.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, tensor: Tensor) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.insert(key, tensor);
        true
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// `(key, tensor)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.order
            .iter()
            .filter_map(|key| self.tensors.get(key).map(|t| (key.as_str(), t)))
    }

    pub fn metadata(&self) -> &Option<HeaderMetadata> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: Option<HeaderMetadata>) {
        self.metadata = metadata;
    }

    /// Total tensor payload in bytes.
    pub fn total_bytes(&self) -> usize {
        self.tensors.values().map(Tensor::byte_len).sum()
    }
}
