//! An open-addressing hash table, used both for the VM's global-variable table and for string
//! interning inside [crate::object::Heap].
//!
//! This mirrors the reference implementation's `table.c` deliberately rather than reaching for
//! `std::collections::HashMap`: the probe sequence, tombstone handling, and `find_string` lookup
//! are the actual subject matter here, not incidental plumbing.

use std::rc::Rc;

use crate::object::Obj;
use crate::value::Value;

const MAX_LOAD_FACTOR: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

enum Slot {
    Empty,
    Tombstone,
    Entry { key: Rc<Obj>, value: Value },
}

/// A hash table keyed by interned string objects, using linear probing and tombstone deletion.
pub struct Table {
    entries: Vec<Slot>,
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Table { entries: Vec::new(), count: 0 }
    }
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn key_hash(key: &Rc<Obj>) -> u32 {
        key.as_string().expect("Table keys must be interned strings").hash
    }

    fn key_chars(key: &Rc<Obj>) -> Rc<str> {
        Rc::clone(&key.as_string().expect("Table keys must be interned strings").chars)
    }

    /// Finds the slot a key with the given hash would occupy: either its existing entry, or the
    /// first empty slot in its probe sequence (remembering the first tombstone seen so insertion
    /// can reuse it).
    fn find_slot(entries: &[Slot], hash: u32, matches: impl Fn(&Rc<Obj>) -> bool) -> usize {
        let capacity = entries.len();
        let mut index = (hash as usize) % capacity;
        let mut tombstone: Option<usize> = None;

        loop {
            match &entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Entry { key, .. } if matches(key) => return index,
                Slot::Entry { .. } => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() { INITIAL_CAPACITY } else { self.entries.len() * 2 };
        let mut new_entries = Vec::with_capacity(new_capacity);
        new_entries.resize_with(new_capacity, || Slot::Empty);

        self.count = 0;
        let old_entries = std::mem::replace(&mut self.entries, new_entries);
        for slot in old_entries {
            if let Slot::Entry { key, value } = slot {
                let hash = Self::key_hash(&key);
                let chars = Self::key_chars(&key);
                let index = Self::find_slot(&self.entries, hash, |k| {
                    Rc::ptr_eq(k, &key) || Self::key_chars(k) == chars
                });
                self.entries[index] = Slot::Entry { key, value };
                self.count += 1;
            }
        }
    }

    /// Inserts or overwrites `key`'s value. Returns `true` if this created a new entry.
    pub fn set(&mut self, key: &Rc<Obj>, value: Value) -> bool {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }

        let hash = Self::key_hash(key);
        let chars = Self::key_chars(key);
        let index = Self::find_slot(&self.entries, hash, |k| Rc::ptr_eq(k, key) || Self::key_chars(k) == chars);

        let is_new = !matches!(self.entries[index], Slot::Entry { .. });
        if is_new && !matches!(self.entries[index], Slot::Tombstone) {
            self.count += 1;
        }
        self.entries[index] = Slot::Entry { key: Rc::clone(key), value };
        is_new
    }

    pub fn get(&self, key: &Rc<Obj>) -> Option<&Value> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = Self::key_hash(key);
        let chars = Self::key_chars(key);
        let index = Self::find_slot(&self.entries, hash, |k| Rc::ptr_eq(k, key) || Self::key_chars(k) == chars);
        match &self.entries[index] {
            Slot::Entry { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Deletes `key`, leaving a tombstone so later probe sequences through this slot still find
    /// entries placed after it.
    pub fn delete(&mut self, key: &Rc<Obj>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let hash = Self::key_hash(key);
        let chars = Self::key_chars(key);
        let index = Self::find_slot(&self.entries, hash, |k| Rc::ptr_eq(k, key) || Self::key_chars(k) == chars);
        if matches!(self.entries[index], Slot::Entry { .. }) {
            self.entries[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    /// The specialized lookup string interning needs: find an already-interned string with these
    /// exact contents and hash, without first having to allocate an [Obj] to key the search with.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<Obj>> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) % capacity;
        loop {
            match &self.entries[index] {
                Slot::Empty => return None,
                Slot::Entry { key, .. } => {
                    if let Some(s) = key.as_string() {
                        if s.hash == hash && &*s.chars == chars {
                            return Some(Rc::clone(key));
                        }
                    }
                }
                Slot::Tombstone => {}
            }
            index = (index + 1) % capacity;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::ObjString;

    fn string_obj(s: &str) -> Rc<Obj> {
        let hash = crate::object::fnv1a_hash(s.as_bytes());
        Rc::new(Obj::String(ObjString { chars: Rc::from(s), hash }))
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut table = Table::new();
        let key = string_obj("answer");
        table.set(&key, Value::Number(42.0));
        assert_eq!(Some(42.0), table.get(&key).and_then(Value::as_number));
    }

    #[test]
    fn overwriting_does_not_grow_count() {
        let mut table = Table::new();
        let key = string_obj("x");
        assert!(table.set(&key, Value::Number(1.0)));
        assert!(!table.set(&key, Value::Number(2.0)));
        assert_eq!(1, table.len());
    }

    #[test]
    fn delete_then_get_returns_none_but_reuses_slot() {
        let mut table = Table::new();
        let key = string_obj("gone");
        table.set(&key, Value::Bool(true));
        assert!(table.delete(&key));
        assert!(table.get(&key).is_none());
    }

    #[test]
    fn find_string_locates_interned_contents() {
        let mut table = Table::new();
        let key = string_obj("hello");
        table.set(&key, Value::Nil);
        let hash = crate::object::fnv1a_hash(b"hello");
        let found = table.find_string("hello", hash).expect("should find interned string");
        assert!(Rc::ptr_eq(&key, &found));
        assert!(table.find_string("goodbye", crate::object::fnv1a_hash(b"goodbye")).is_none());
    }

    #[test]
    fn grows_past_many_entries() {
        let mut table = Table::new();
        let keys: Vec<_> = (0..100).map(|i| string_obj(&format!("key{i}"))).collect();
        for (i, key) in keys.iter().enumerate() {
            table.set(key, Value::Number(i as f64));
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(Some(i as f64), table.get(key).and_then(Value::as_number));
        }
    }
}
