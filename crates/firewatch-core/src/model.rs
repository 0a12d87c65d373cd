use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec::FORMAT_VERSION;

/// One open issue as returned by the issue search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRecord {
    pub id: u64,
    pub title: String,
    pub reaction_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub id: u64,
    pub title: String,
    pub reaction_count: u64,
}

impl From<&IssueRecord> for SnapshotEntry {
    fn from(record: &IssueRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            reaction_count: record.reaction_count,
        }
    }
}

/// Point-in-time mapping of issue id to entry.
///
/// Iteration follows insertion order, and each id appears at most once: the
/// first entry inserted for an id is kept and later ones are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    format_version: String,
    entries: Vec<SnapshotEntry>,
    index: HashMap<u64, usize>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::with_version(FORMAT_VERSION)
    }

    pub fn with_version(format_version: impl Into<String>) -> Self {
        Self {
            format_version: format_version.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn format_version(&self) -> &str {
        &self.format_version
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, entry: SnapshotEntry) -> bool {
        if self.index.contains_key(&entry.id) {
            return false;
        }

        self.index.insert(entry.id, self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn get(&self, id: u64) -> Option<&SnapshotEntry> {
        self.index.get(&id).and_then(|position| self.entries.get(*position))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SnapshotEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a SnapshotEntry;
    type IntoIter = std::slice::Iter<'a, SnapshotEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Result of loading the previous run's snapshot.
///
/// Only `Loaded` carries comparable data; every other variant is consumed as
/// an empty baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    Loaded(Snapshot),
    Empty,
    VersionMismatch { found: Option<String> },
    Unreadable { reason: String },
}

impl Baseline {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Baseline::Loaded(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.snapshot().map_or(0, Snapshot::len)
    }

    pub fn status(&self) -> &'static str {
        match self {
            Baseline::Loaded(_) => "loaded",
            Baseline::Empty => "empty",
            Baseline::VersionMismatch { .. } => "version-mismatch",
            Baseline::Unreadable { .. } => "unreadable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRecord {
    pub id: u64,
    pub title: String,
    pub reaction_count: u64,
    /// `None` when the issue was not present in the baseline.
    pub previous_reaction_count: Option<u64>,
}
