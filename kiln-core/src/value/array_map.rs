//! Small insertion-ordered map used for literals below the hash threshold

use super::Value;
use std::sync::Arc;

/// Immutable map backed by a flat slice of entries
///
/// Lookup is linear, which beats hashing for the handful of entries that
/// map literals usually carry. Keys are unique; the last write for a key
/// wins while its first position is kept.
#[derive(Debug, Clone, Default)]
pub struct ArrayMap {
    entries: Arc<[(Value, Value)]>,
}

impl ArrayMap {
    /// Build a map from key/value pairs
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let mut entries: Vec<(Value, Value)> = Vec::new();
        for (key, value) in pairs {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => entries.push((key, value)),
            }
        }
        Self {
            entries: entries.into(),
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Copy the entries into a hashed persistent map
    pub fn to_hash_map(&self) -> im::HashMap<Value, Value> {
        self.entries.iter().cloned().collect()
    }
}
