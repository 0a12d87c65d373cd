//! Snapshot domain modules shared by the firewatch job.
//!
//! - `model`: issue records, snapshot entries, insertion-ordered snapshots, alerts.
//! - `codec`: versioned snapshot wire format with soft-fail decoding.
//! - `builder`: first-write-wins snapshot assembly from search results.
//! - `diff`: baseline comparison and the alert rule.

pub mod builder;
pub mod codec;
pub mod diff;
pub mod model;

pub use builder::build_snapshot;
pub use codec::{CodecError, FORMAT_VERSION, decode, encode};
pub use diff::diff;
pub use model::{AlertRecord, Baseline, IssueRecord, Snapshot, SnapshotEntry};
