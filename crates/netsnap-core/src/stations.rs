//! Address to name lookup for stations and hosts.
//!
//! The table is loaded once at startup and shared read-only. The same table
//! resolves wireless hardware addresses (`aa:bb:cc:dd:ee:ff`) and the IP
//! addresses seen in conntrack dumps.

use crate::error::StationTableError;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct StationTable {
    names: HashMap<String, String>,
}

impl StationTable {
    pub fn from_pairs<A, N>(pairs: impl IntoIterator<Item = (A, N)>) -> Self
    where
        A: Into<String>,
        N: Into<String>,
    {
        let names = pairs
            .into_iter()
            .map(|(a, n)| (normalize(&a.into()), n.into()))
            .collect();
        Self { names }
    }

    /// Parses `address name` lines. Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Result<Self, StationTableError> {
        let mut names = HashMap::new();
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(addr), Some(name), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(StationTableError::Malformed {
                    line: lineno + 1,
                    content: raw.to_string(),
                });
            };
            names.insert(normalize(addr), name.to_string());
        }
        Ok(Self { names })
    }

    pub fn load(path: &Path) -> Result<Self, StationTableError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| StationTableError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content)
    }

    pub fn lookup(&self, address: &str) -> Option<&str> {
        self.names.get(&normalize(address)).map(|s| s.as_str())
    }

    /// Returns the known name, or the address itself when unknown.
    pub fn resolve<'a>(&'a self, address: &'a str) -> &'a str {
        self.lookup(address).unwrap_or(address)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// Hardware addresses are matched case-insensitively.
fn normalize(address: &str) -> String {
    address.to_ascii_lowercase()
}
