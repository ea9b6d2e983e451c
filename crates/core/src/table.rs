//! An open-addressing hash table with linear probing, keyed by interned
//! string pointers. Used both by the string intern table ([`crate::intern`])
//! and by the VM's globals table.
//!
//! Deletions leave a tombstone (a present-but-keyless slot) so probe chains
//! past a deleted entry stay intact; tombstones count toward the load
//! factor so a table that's absorbed many deletions still resizes. Capacity
//! is always a power of two, grown whenever the table would exceed a 0.75
//! load factor, which keeps expected probe length low without the overhead
//! of storing it alongside every entry.

use crate::object::Obj;

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD_FACTOR: f64 = 0.75;

struct Entry<V> {
    /// `None` means either "never used" or "tombstone"; `tombstone`
    /// distinguishes the two so probing knows to keep scanning past it.
    key: Option<*mut Obj>,
    value: Option<V>,
    tombstone: bool,
}

impl<V> Entry<V> {
    fn empty() -> Self {
        Entry { key: None, value: None, tombstone: false }
    }
}

pub struct Table<V> {
    entries: Vec<Entry<V>>,
    count: usize, // live entries + tombstones
    len: usize,   // live entries only
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Table<V> {
    pub fn new() -> Self {
        Table {
            entries: (0..INITIAL_CAPACITY).map(|_| Entry::empty()).collect(),
            count: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn key_hash(key: *mut Obj) -> u32 {
        unsafe {
            (*key)
                .as_string()
                .expect("Table keys must be interned strings")
                .hash
        }
    }

    /// Locates the slot `key` belongs in: the live entry if present,
    /// otherwise the first tombstone or empty slot seen along the probe
    /// chain (so repeated inserts after deletes reuse freed slots).
    fn find_slot(entries: &[Entry<V>], key: *mut Obj, hash: u32) -> usize {
        let capacity = entries.len();
        let mut index = hash as usize & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                Some(k) if std::ptr::eq(k, key) => return index,
                None if entry.tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                None => return tombstone.unwrap_or(index),
                _ => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries: Vec<Entry<V>> = (0..new_capacity).map(|_| Entry::empty()).collect();
        let mut live = 0;
        for entry in self.entries.drain(..) {
            if let (Some(key), Some(value)) = (entry.key, entry.value) {
                let hash = Self::key_hash(key);
                let slot = Self::find_slot(&new_entries, key, hash);
                new_entries[slot] = Entry { key: Some(key), value: Some(value), tombstone: false };
                live += 1;
            }
        }
        self.entries = new_entries;
        self.count = live;
    }

    /// Inserts or overwrites `key`'s value. Returns `true` if `key` was not
    /// already present.
    pub fn insert(&mut self, key: *mut Obj, value: V) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow(self.capacity() * 2);
        }
        let hash = Self::key_hash(key);
        let slot = Self::find_slot(&self.entries, key, hash);
        let entry = &mut self.entries[slot];
        let is_new = entry.key.is_none();
        if is_new && !entry.tombstone {
            self.count += 1;
        }
        if is_new {
            self.len += 1;
        }
        entry.key = Some(key);
        entry.value = Some(value);
        entry.tombstone = false;
        is_new
    }

    pub fn get(&self, key: *mut Obj) -> Option<&V> {
        if self.len == 0 {
            return None;
        }
        let hash = Self::key_hash(key);
        let slot = Self::find_slot(&self.entries, key, hash);
        self.entries[slot].value.as_ref()
    }

    pub fn get_mut(&mut self, key: *mut Obj) -> Option<&mut V> {
        if self.len == 0 {
            return None;
        }
        let hash = Self::key_hash(key);
        let slot = Self::find_slot(&self.entries, key, hash);
        self.entries[slot].value.as_mut()
    }

    pub fn contains(&self, key: *mut Obj) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, leaving a tombstone in its place.
    pub fn delete(&mut self, key: *mut Obj) -> bool {
        if self.len == 0 {
            return false;
        }
        let hash = Self::key_hash(key);
        let slot = Self::find_slot(&self.entries, key, hash);
        if self.entries[slot].key.is_none() {
            return false;
        }
        self.entries[slot].key = None;
        self.entries[slot].value = None;
        self.entries[slot].tombstone = true;
        self.len -= 1;
        true
    }

    /// Finds a key by its *content*, rather than pointer identity — the
    /// operation the intern table uses to decide whether a string literal
    /// already has a heap representative before allocating a new one.
    /// `hash` must be the FNV-1a hash of `s`.
    pub fn find_string(&self, s: &str, hash: u32) -> Option<*mut Obj> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.capacity();
        let mut index = hash as usize & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                Some(key) => {
                    let obj_str = unsafe { (*key).as_string().expect("interned key is a string") };
                    if obj_str.hash == hash && obj_str.as_str() == s {
                        return Some(key);
                    }
                }
                None if !entry.tombstone => return None,
                None => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Heap, ObjKind, ObjString};

    fn intern(heap: &Heap, s: &str) -> *mut Obj {
        heap.alloc(ObjKind::String(ObjString::new(s)))
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let heap = Heap::new();
        let mut table: Table<i64> = Table::new();
        let key = intern(&heap, "x");
        assert!(table.insert(key, 42));
        assert_eq!(table.get(key), Some(&42));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn reinsert_overwrites_without_growing_len() {
        let heap = Heap::new();
        let mut table: Table<i64> = Table::new();
        let key = intern(&heap, "x");
        assert!(table.insert(key, 1));
        assert!(!table.insert(key, 2));
        assert_eq!(table.get(key), Some(&2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn delete_then_reinsert_reuses_tombstone() {
        let heap = Heap::new();
        let mut table: Table<i64> = Table::new();
        let key = intern(&heap, "x");
        table.insert(key, 1);
        assert!(table.delete(key));
        assert_eq!(table.get(key), None);
        assert!(table.insert(key, 5));
        assert_eq!(table.get(key), Some(&5));
    }

    #[test]
    fn grows_past_load_factor_and_preserves_entries() {
        let heap = Heap::new();
        let mut table: Table<i64> = Table::new();
        let keys: Vec<_> = (0..64)
            .map(|i| intern(&heap, &format!("key{i}")))
            .collect();
        for (i, &k) in keys.iter().enumerate() {
            table.insert(k, i as i64);
        }
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(table.get(k), Some(&(i as i64)));
        }
        assert_eq!(table.len(), 64);
    }

    #[test]
    fn find_string_matches_by_content() {
        let heap = Heap::new();
        let mut table: Table<()> = Table::new();
        let key = intern(&heap, "hello");
        let hash = crate::object::fnv1a(b"hello");
        table.insert(key, ());
        assert_eq!(table.find_string("hello", hash), Some(key));
        assert_eq!(table.find_string("world", crate::object::fnv1a(b"world")), None);
    }
}
