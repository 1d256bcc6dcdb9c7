//! Tag → keys index.

use std::collections::HashSet;

use dashmap::DashMap;

/// Maps each tag to the keys whose live entry carries it.
///
/// The store mutates the index only while holding the key's lock, so a key
/// is listed under a tag exactly when its current entry lists that tag.
#[derive(Debug, Default)]
pub struct TagIndex {
    index: DashMap<String, HashSet<String>>,
}

impl TagIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under each tag.
    pub fn add<'a>(&self, key: &str, tags: impl IntoIterator<Item = &'a String>) {
        for tag in tags {
            self.index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Unregister `key` from each tag, dropping tags left empty.
    pub fn remove<'a>(&self, key: &str, tags: impl IntoIterator<Item = &'a String>) {
        for tag in tags {
            let now_empty = match self.index.get_mut(tag) {
                Some(mut keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.index.remove_if(tag, |_, keys| keys.is_empty());
            }
        }
    }

    /// Snapshot of the keys currently under `tag`, sorted.
    pub fn keys(&self, tag: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .index
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Check if `key` is listed under `tag`.
    pub fn contains(&self, tag: &str, key: &str) -> bool {
        self.index
            .get(tag)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    /// Number of tags with at least one key.
    pub fn tag_count(&self) -> usize {
        self.index.len()
    }

    /// Drop every tag.
    pub fn clear(&self) {
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_and_remove() {
        let index = TagIndex::new();
        index.add("p1", &s(&["products", "home"]));
        index.add("p2", &s(&["products"]));

        assert_eq!(index.keys("products"), s(&["p1", "p2"]));
        assert!(index.contains("home", "p1"));
        assert_eq!(index.tag_count(), 2);

        index.remove("p1", &s(&["products", "home"]));
        assert_eq!(index.keys("products"), s(&["p2"]));
        assert!(index.keys("home").is_empty());
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let index = TagIndex::new();
        index.remove("nope", &s(&["missing"]));
        assert_eq!(index.tag_count(), 0);
    }
}
