//! Append-only name interning table.
//!
//! Entries are never removed and their indices never move, so an index
//! handed out by [`SymbolTable::emplace`] stays valid for the life of the
//! table. Re-interning an existing name updates the stored value in place
//! and returns the original key.

use rustc_hash::FxHashMap;

use ingot_core::RawId;

use crate::writer::RelocWriter;

/// A value that knows its own wire encoding.
pub trait WireValue {
    fn encode(&self, w: &mut RelocWriter);
}

#[derive(Debug)]
struct SymbolEntry<K, V> {
    key: K,
    value: V,
    name: String,
}

/// Interned names with dense keys and associated values.
#[derive(Debug, Default)]
pub struct SymbolTable<K, V> {
    entries: Vec<SymbolEntry<K, V>>,
    lookup: FxHashMap<String, usize>,
}

impl<K: RawId, V> SymbolTable<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            lookup: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: K) -> bool {
        (key.raw() as usize) < self.entries.len()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    /// The value stored under `key`, if interned.
    pub fn get(&self, key: K) -> Option<&V> {
        self.entries.get(key.raw() as usize).map(|e| &e.value)
    }

    /// The name stored under `key`, if interned.
    pub fn name(&self, key: K) -> Option<&str> {
        self.entries.get(key.raw() as usize).map(|e| e.name.as_str())
    }

    /// Look up a name, returning its key and value.
    pub fn by_name(&self, name: &str) -> Option<(K, &V)> {
        let index = *self.lookup.get(name)?;
        let entry = &self.entries[index];
        Some((entry.key, &entry.value))
    }

    /// Intern `name` with `value`, or overwrite the value of an existing
    /// entry. Returns the entry's key either way.
    pub fn emplace(&mut self, name: &str, value: V) -> K {
        if let Some(&index) = self.lookup.get(name) {
            self.entries[index].value = value;
            return self.entries[index].key;
        }
        let index = self.entries.len();
        let key = K::from_raw(index as u32);
        self.entries.push(SymbolEntry {
            key,
            value,
            name: name.to_owned(),
        });
        self.lookup.insert(name.to_owned(), index);
        key
    }

    /// Overwrite the value stored under `key`. Returns false if the key
    /// was never interned.
    pub fn update_value(&mut self, key: K, value: V) -> bool {
        match self.entries.get_mut(key.raw() as usize) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }

    /// Iterate entries in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &str, &V)> {
        self.entries
            .iter()
            .map(|e| (e.key, e.name.as_str(), &e.value))
    }
}

impl<K: RawId, V: WireValue> SymbolTable<K, V> {
    /// Export as two deferred sections: one of fixed-width entry records,
    /// one of concatenated name bytes.
    ///
    /// Each record holds the name's byte offset into the string section,
    /// its length, the entry key, and the encoded value.
    pub fn export(&self, w: &mut RelocWriter) {
        let mut records = w.write_deferred();
        let mut strings = w.write_deferred();

        for entry in &self.entries {
            records.write_u32(strings.len() as u32);
            records.write_u32(entry.name.len() as u32);
            records.write_u32(entry.key.raw());
            entry.value.encode(&mut records);
            records.bump();

            strings.write_bytes(entry.name.as_bytes());
            strings.bump_by(entry.name.len() as u32);
        }

        w.adopt(records);
        w.adopt(strings);
    }
}
