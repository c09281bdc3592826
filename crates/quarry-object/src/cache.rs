//! LRU cache of parsed objects.

use std::num::NonZeroUsize;

use lru::LruCache;
use quarry_hash::ObjectId;

use crate::Object;

/// LRU cache keyed by object id.
pub struct ObjectCache {
    cache: LruCache<ObjectId, Object>,
}

impl ObjectCache {
    /// Create with the given capacity in objects (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            ),
        }
    }

    /// Fetch a cached object, promoting it to most-recently-used.
    pub fn get(&mut self, id: &ObjectId) -> Option<&Object> {
        self.cache.get(id)
    }

    /// Insert an object, returning the evicted entry if any.
    pub fn insert(&mut self, id: ObjectId, obj: Object) -> Option<(ObjectId, Object)> {
        self.cache.push(id, obj)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.cache.contains(id)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Blob;

    fn make(n: u8) -> (ObjectId, Object) {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        (ObjectId::new(bytes), Object::Blob(Blob::new(vec![n])))
    }

    #[test]
    fn insert_and_get() {
        let mut cache = ObjectCache::new(4);
        let (id, obj) = make(1);
        cache.insert(id, obj.clone());
        assert_eq!(cache.get(&id), Some(&obj));
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ObjectCache::new(2);
        let (id1, obj1) = make(1);
        let (id2, obj2) = make(2);
        let (id3, obj3) = make(3);

        cache.insert(id1, obj1);
        cache.insert(id2, obj2);
        cache.get(&id1);
        cache.insert(id3, obj3);

        assert!(cache.get(&id1).is_some());
        assert!(cache.get(&id2).is_none());
        assert!(cache.get(&id3).is_some());
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let mut cache = ObjectCache::new(0);
        let (id, obj) = make(1);
        cache.insert(id, obj);
        assert_eq!(cache.len(), 1);
    }
}
