// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::entry::{IceServerEntry, split_link_header};
use super::store::StateStore;
use crate::core::Result;

/// Persistence key for the `|`-joined relay entries.
pub const TURN_URLS_KEY: &str = "turn_urls";

const PERSIST_SEPARATOR: char = '|';

/// De-duplicated set of ICE server entries.
///
/// Entries are unique by url, username and credential. Insertion order is
/// kept only so persisted records read back the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServerDirectory {
    entries: Vec<IceServerEntry>,
}

impl IceServerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if an equal entry is already present.
    pub fn insert(&mut self, entry: IceServerEntry) -> bool {
        let duplicate = self.entries.iter().any(|existing| {
            existing.url == entry.url
                && existing.username == entry.username
                && existing.credential == entry.credential
        });
        if duplicate {
            tracing::debug!("[IceDirectory] Skipping duplicate entry {}", entry);
            return false;
        }
        self.entries.push(entry);
        true
    }

    fn insert_encoded(&mut self, encoded: &str) {
        match encoded.parse::<IceServerEntry>() {
            Ok(entry) => {
                self.insert(entry);
            }
            Err(e) => tracing::warn!("[IceDirectory] Skipping entry: {}", e),
        }
    }

    /// Builds a directory from WHIP `Link` header values. Malformed entries are skipped.
    pub fn from_link_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut directory = Self::new();
        for value in values {
            for link in split_link_header(value.as_ref()) {
                directory.insert_encoded(link);
            }
        }
        directory
    }

    /// Parses a `|`-joined record. Empty segments are ignored.
    pub fn from_persisted(record: &str) -> Self {
        let mut directory = Self::new();
        for segment in record.split(PERSIST_SEPARATOR) {
            if !segment.trim().is_empty() {
                directory.insert_encoded(segment.trim());
            }
        }
        directory
    }

    pub fn to_persisted(&self) -> String {
        self.entries
            .iter()
            .map(IceServerEntry::to_link_value)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Reads the entries saved by the previous session, if any.
    pub fn load(store: &dyn StateStore) -> Result<Self> {
        let directory = store
            .get(TURN_URLS_KEY)?
            .map(|record| Self::from_persisted(&record))
            .unwrap_or_default();
        tracing::debug!(
            "[IceDirectory] Loaded {} persisted entries",
            directory.len()
        );
        Ok(directory)
    }

    pub fn persist(&self, store: &dyn StateStore) -> Result<()> {
        store.set(TURN_URLS_KEY, &self.to_persisted())?;
        tracing::debug!("[IceDirectory] Persisted {} entries", self.len());
        Ok(())
    }

    pub fn entries(&self) -> &[IceServerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for IceServerDirectory {
    type Item = IceServerEntry;
    type IntoIter = std::vec::IntoIter<IceServerEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<IceServerEntry> for IceServerDirectory {
    fn from_iter<T: IntoIterator<Item = IceServerEntry>>(iter: T) -> Self {
        let mut directory = Self::new();
        for entry in iter {
            directory.insert(entry);
        }
        directory
    }
}
