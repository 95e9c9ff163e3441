use crate::emit::Labels;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

/// Label strings of one block, stored once and referenced by hash.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct StringInterner {
    strings: HashMap<u64, String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string and returns its hash (ID).
    pub fn intern(&mut self, s: &str) -> u64 {
        let hash = xxh3_64(s.as_bytes());
        self.strings.entry(hash).or_insert_with(|| s.to_string());
        hash
    }

    pub fn resolve(&self, hash: u64) -> Option<&str> {
        self.strings.get(&hash).map(|s| s.as_str())
    }

    /// Interns every key and value of a label set.
    pub fn intern_labels(&mut self, labels: &Labels) -> Vec<(u64, u64)> {
        labels
            .iter()
            .map(|(k, v)| (self.intern(k), self.intern(v)))
            .collect()
    }

    /// Rebuilds a label set. Returns `None` if a hash is unknown.
    pub fn resolve_labels(&self, pairs: &[(u64, u64)]) -> Option<Labels> {
        pairs
            .iter()
            .map(|(k, v)| Some((self.resolve(*k)?.to_string(), self.resolve(*v)?.to_string())))
            .collect()
    }

    pub fn clear(&mut self) {
        self.strings.clear();
        self.strings.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Stable identity of a series: xxh3 over its canonical `k=v` pairs.
pub fn series_id(labels: &Labels) -> u64 {
    let mut h = Xxh3::new();
    for (k, v) in labels {
        h.update(k.as_bytes());
        h.update(b"=");
        h.update(v.as_bytes());
        h.update(&[0]);
    }
    h.digest()
}
