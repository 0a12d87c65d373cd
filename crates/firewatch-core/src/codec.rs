use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{Baseline, Snapshot, SnapshotEntry};

pub const FORMAT_VERSION: &str = "1.0";

/// Serializes `{"version": .., "data": [[id, {"reactions", "title", "id"}], ..]}`
/// with `data` in the snapshot's iteration order.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, CodecError> {
    let wire = WireSnapshotRef {
        version: snapshot.format_version(),
        data: snapshot
            .iter()
            .map(|entry| {
                (
                    entry.id,
                    WireEntryRef {
                        reactions: entry.reaction_count,
                        title: &entry.title,
                        id: entry.id,
                    },
                )
            })
            .collect(),
    };

    serde_json::to_vec(&wire).map_err(CodecError::Encode)
}

/// Never fails: anything that is not a well-formed payload of the current
/// version comes back as a non-`Loaded` baseline.
pub fn decode(bytes: &[u8]) -> Baseline {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(error) => {
            return Baseline::Unreadable {
                reason: format!("invalid snapshot json: {error}"),
            };
        }
    };

    let found = value.get("version").and_then(Value::as_str);
    if found != Some(FORMAT_VERSION) {
        return Baseline::VersionMismatch {
            found: found.map(ToOwned::to_owned),
        };
    }

    let wire: WireSnapshot = match serde_json::from_value(value) {
        Ok(wire) => wire,
        Err(error) => {
            return Baseline::Unreadable {
                reason: format!("invalid snapshot data: {error}"),
            };
        }
    };

    let mut snapshot = Snapshot::new();
    for (id, entry) in wire.data {
        snapshot.insert(SnapshotEntry {
            id,
            title: entry.title,
            reaction_count: entry.reactions,
        });
    }

    Baseline::Loaded(snapshot)
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode snapshot")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct WireSnapshotRef<'a> {
    version: &'a str,
    data: Vec<(u64, WireEntryRef<'a>)>,
}

#[derive(Debug, Serialize)]
struct WireEntryRef<'a> {
    reactions: u64,
    title: &'a str,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    data: Vec<(u64, WireEntry)>,
}

#[derive(Debug, Deserialize)]
struct WireEntry {
    reactions: u64,
    #[serde(default)]
    title: String,
}
