use std::collections::HashMap;

/// Local partition of the key space.
///
/// Entries are insert-only: there is no overwrite, delete or migration.
#[derive(Default)]
pub(crate) struct KeyStore {
    items: HashMap<String, Vec<u8>>,
}

impl KeyStore {
    pub fn new() -> KeyStore {
        KeyStore::default()
    }

    /// Store the value unless the key is already present. Returns whether it was stored.
    pub fn add_item(&mut self, key: String, value: Vec<u8>) -> bool {
        if self.items.contains_key(&key) {
            false
        } else {
            self.items.insert(key, value);
            true
        }
    }

    pub fn find_item(&self, key: &str) -> Option<&[u8]> {
        self.items.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::KeyStore;

    #[test]
    fn positive_add_and_find() {
        let mut store = KeyStore::new();

        assert!(store.add_item("k".to_owned(), b"v".to_vec()));
        assert_eq!(store.find_item("k"), Some(&b"v"[..]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn negative_duplicate_keeps_first_value() {
        let mut store = KeyStore::new();

        assert!(store.add_item("k".to_owned(), b"v".to_vec()));
        assert!(!store.add_item("k".to_owned(), b"v2".to_vec()));
        assert_eq!(store.find_item("k"), Some(&b"v"[..]));
    }

    #[test]
    fn negative_missing_key() {
        let store = KeyStore::new();

        assert_eq!(store.find_item("nope"), None);
    }
}
