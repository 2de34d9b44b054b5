use opentelemetry::propagation::{Extractor, Injector};

use crate::error::HeaderError;

/// A single message header entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Value as UTF-8, or `None` when the bytes are not valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Ordered message header collection.
///
/// Duplicate keys are legal at this layer; the storage keeps every entry
/// in encounter order. The unique-key mapping required by trace
/// propagation is the derived [`HeaderMap`] view, never a second copy of
/// the data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry without touching existing ones, so duplicate
    /// keys accumulate.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.push(Header::new(key, value));
    }

    pub fn entries(&self) -> &[Header] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.entries.iter()
    }

    /// Number of stored entries, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copies the entries starting at `offset` into `dst`, decoding
    /// values lossily, and returns how many were written. At most
    /// `dst.len()` entries are copied. Fails when `offset` is at or past
    /// the end of the collection, so copying from an empty collection
    /// always fails.
    pub fn copy_into(
        &self,
        dst: &mut [(String, String)],
        offset: usize,
    ) -> Result<usize, HeaderError> {
        if offset >= self.entries.len() {
            return Err(HeaderError::OffsetOutOfRange(
                offset,
                self.entries.len(),
            ));
        }
        let tail = &self.entries[offset..];
        let mut copied = 0;
        for (slot, header) in dst.iter_mut().zip(tail) {
            *slot = (
                header.key.clone(),
                String::from_utf8_lossy(&header.value).into_owned(),
            );
            copied += 1;
        }
        Ok(copied)
    }

    /// The flat key-to-value view used for context injection and
    /// extraction.
    pub fn as_map(&mut self) -> HeaderMap<'_> {
        HeaderMap(self)
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Flat string map view over a [`Headers`] collection.
///
/// Reads resolve duplicate keys to the last-written value; writes
/// collapse duplicates so only the newest value for a key survives.
/// Values that are not valid UTF-8 read as absent. The view is created
/// per message right before injection or extraction and is not kept
/// around afterwards.
pub struct HeaderMap<'a>(pub &'a mut Headers);

impl HeaderMap<'_> {
    /// Last-written value for `key`, absent when the key is missing or
    /// its newest value is not valid UTF-8.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .entries
            .iter()
            .rev()
            .find(|header| header.key == key)?
            .value_str()
    }

    /// Removes every entry for `key`, then appends the new value at the
    /// end. Entries for other keys keep their relative order.
    pub fn set(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.0.entries.retain(|header| header.key != key);
        self.0.entries.push(Header::new(key, value));
    }

    /// Removes the most-recently-added entry for `key`. Returns `false`
    /// when no such key exists.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.0.entries.iter().rposition(|header| header.key == key) {
            Some(index) => {
                self.0.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.entries.iter().any(|header| header.key == key)
    }

    /// Distinct keys in first-encounter order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for header in &self.0.entries {
            if !keys.contains(&header.key.as_str()) {
                keys.push(header.key.as_str());
            }
        }
        keys
    }

    /// Key-value pairs with duplicates resolved to the last-written
    /// value, keys in first-encounter order. Pairs whose resolved value
    /// is not valid UTF-8 are skipped.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(key).map(|value| (key, value)))
            .collect()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }
}

impl Injector for HeaderMap<'_> {
    fn set(&mut self, key: &str, value: String) {
        HeaderMap::set(self, key, value);
    }
}

impl Extractor for HeaderMap<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key)
    }

    fn keys(&self) -> Vec<&str> {
        HeaderMap::keys(self)
    }
}
