use crate::object::{Blob, Value};
use hashbrown::HashMap;

/// Hash tables below this capacity are never shrunk.
const MIN_SLOTS: usize = 16384;
/// Minimal fill percentage before a table is considered too sparse.
const MIN_FILL: usize = 10;

/// One logical database: a map from key bytes to a typed value. The map
/// takes shared ownership of the key string and full ownership of the
/// value on insert; removal drops both.
pub struct Database {
    map: HashMap<Blob, Value>,
}

impl Database {
    #[inline]
    pub fn new() -> Database {
        Database { map: HashMap::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    #[inline]
    pub fn find(&self, key: &Blob) -> Option<&Value> {
        self.map.get(&**key)
    }

    #[inline]
    pub fn find_mut(&mut self, key: &Blob) -> Option<&mut Value> {
        self.map.get_mut(&**key)
    }

    #[inline]
    pub fn contains(&self, key: &Blob) -> bool {
        self.map.contains_key(&**key)
    }

    /// Insert a fresh key. Hands the pair back untouched when the key is
    /// already present.
    #[inline]
    pub fn add(&mut self, key: Blob, value: Value) -> Result<(), (Blob, Value)> {
        if self.map.contains_key(&*key) {
            Err((key, value))
        } else {
            self.map.insert(key, value);
            Ok(())
        }
    }

    /// Insert or overwrite.
    #[inline]
    pub fn replace(&mut self, key: Blob, value: Value) {
        self.map.insert(key, value);
    }

    #[inline]
    pub fn remove(&mut self, key: &Blob) -> bool {
        self.map.remove(&**key).is_some()
    }

    /// Remove a key and hand back the owned entry.
    #[inline]
    pub fn take(&mut self, key: &Blob) -> Option<(Blob, Value)> {
        self.map.remove_entry(&**key)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&Blob, &Value)> {
        self.map.iter()
    }

    /// Key at the given position in iteration order. Position must be below
    /// `len`.
    #[inline]
    pub fn nth_key(&self, n: usize) -> Option<&Blob> {
        self.map.keys().nth(n)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Shrink the table when usage dropped below `MIN_FILL` percent of a
    /// capacity above `MIN_SLOTS`. Returns whether a resize happened.
    pub fn shrink_if_sparse(&mut self) -> bool {
        let size = self.map.capacity();
        let used = self.map.len();
        if size > MIN_SLOTS && used * 100 < size * MIN_FILL {
            self.map.shrink_to(used);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::blob;

    #[test]
    fn test_add_detects_duplicates() {
        let mut db = Database::new();
        assert!(db.add(blob(b"k"), Value::Str(blob(b"v1"))).is_ok());
        assert!(db.add(blob(b"k"), Value::Str(blob(b"v2"))).is_err());
        assert_eq!(db.find(&blob(b"k")), Some(&Value::Str(blob(b"v1"))));
    }

    #[test]
    fn test_replace_overwrites() {
        let mut db = Database::new();
        db.replace(blob(b"k"), Value::Str(blob(b"v1")));
        db.replace(blob(b"k"), Value::Str(blob(b"v2")));
        assert_eq!(db.len(), 1);
        assert_eq!(db.find(&blob(b"k")), Some(&Value::Str(blob(b"v2"))));
    }

    #[test]
    fn test_remove_drops_entry() {
        let mut db = Database::new();
        db.replace(blob(b"k"), Value::Str(blob(b"v")));
        assert!(db.remove(&blob(b"k")));
        assert!(!db.remove(&blob(b"k")));
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn test_take_returns_shared_key() {
        let mut db = Database::new();
        let key = blob(b"k");
        db.replace(key.clone(), Value::Str(blob(b"v")));
        let (taken, _) = db.take(&key).unwrap();
        assert!(std::rc::Rc::ptr_eq(&taken, &key));
    }

    #[test]
    fn test_iterate_yields_each_key_once() {
        let mut db = Database::new();
        for i in 0..100u32 {
            db.replace(blob(format!("key-{}", i).as_bytes()), Value::Str(blob(b"v")));
        }
        let mut seen: Vec<Vec<u8>> = db.iter().map(|(k, _)| k.to_vec()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), db.len());
    }

    #[test]
    fn test_shrink_only_when_sparse_and_large() {
        let mut db = Database::new();
        // Small tables are never resized regardless of fill.
        db.replace(blob(b"k"), Value::Str(blob(b"v")));
        assert!(!db.shrink_if_sparse());

        for i in 0..40_000u32 {
            db.replace(
                blob(format!("key-{}", i).as_bytes()),
                Value::Str(blob(b"v")),
            );
        }
        for i in 100..40_000u32 {
            db.remove(&blob(format!("key-{}", i).as_bytes()));
        }
        assert!(db.capacity() > MIN_SLOTS);
        assert!(db.shrink_if_sparse());
        assert!(db.len() * 100 >= db.capacity() * MIN_FILL);
    }
}
