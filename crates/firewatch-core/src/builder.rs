use crate::model::{IssueRecord, Snapshot, SnapshotEntry};

/// Builds the current snapshot in source order. Pagination overlap can yield
/// the same issue twice; only the first occurrence is kept.
pub fn build_snapshot<'a, I>(records: I) -> Snapshot
where
    I: IntoIterator<Item = &'a IssueRecord>,
{
    let mut snapshot = Snapshot::new();
    for record in records {
        snapshot.insert(SnapshotEntry::from(record));
    }
    snapshot
}
