use hashbrown::HashMap;

use crate::TensorData;

/// Insertion-ordered mapping from hierarchical keys to tensors.
///
/// Keys are unique. Inserting an existing key replaces its tensor in place, so the
/// original position of the key is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorCollection {
    entries: Vec<(String, TensorData)>,
    index: HashMap<String, usize>,
}

impl TensorCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, returning the previous value if the key was already present.
    pub fn insert(&mut self, key: impl Into<String>, data: TensorData) -> Option<TensorData> {
        let key = key.into();
        match self.index.get(&key) {
            Some(&position) => Some(core::mem::replace(&mut self.entries[position].1, data)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, data));
                None
            }
        }
    }

    /// Get the tensor stored under `key`.
    pub fn get(&self, key: &str) -> Option<&TensorData> {
        self.index.get(key).map(|&position| &self.entries[position].1)
    }

    /// Get a mutable reference to the tensor stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut TensorData> {
        self.index
            .get(key)
            .map(|&position| &mut self.entries[position].1)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Owned copy of the keys in insertion order.
    pub fn key_list(&self) -> Vec<String> {
        self.keys().map(str::to_string).collect()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorData)> {
        self.entries.iter().map(|(key, data)| (key.as_str(), data))
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection holds no tensor.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for TensorCollection {
    type Item = (String, TensorData);
    type IntoIter = std::vec::IntoIter<(String, TensorData)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, TensorData)> for TensorCollection {
    fn from_iter<I: IntoIterator<Item = (K, TensorData)>>(iter: I) -> Self {
        let mut collection = Self::new();
        for (key, data) in iter {
            collection.insert(key, data);
        }
        collection
    }
}
