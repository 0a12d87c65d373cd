use crate::model::{AlertRecord, Baseline, Snapshot};

/// Compares `current` against the previous run's baseline.
///
/// Nothing is reported without a loaded, non-empty baseline, so a cold start
/// never alerts on every pre-existing issue. Otherwise an issue alerts when
/// its absolute reaction change exceeds `threshold`, or, if the baseline has
/// never seen it, when its reaction count alone exceeds `threshold`. Both
/// comparisons are strict. Alerts come out in `current`'s iteration order.
pub fn diff(previous: &Baseline, current: &Snapshot, threshold: u64) -> Vec<AlertRecord> {
    let Some(previous) = previous.snapshot().filter(|snapshot| !snapshot.is_empty()) else {
        return Vec::new();
    };

    current
        .iter()
        .filter_map(|entry| {
            let prior = previous.get(entry.id).map(|prior| prior.reaction_count);
            let change = match prior {
                Some(count) => entry.reaction_count.abs_diff(count),
                None => entry.reaction_count,
            };

            (change > threshold).then(|| AlertRecord {
                id: entry.id,
                title: entry.title.clone(),
                reaction_count: entry.reaction_count,
                previous_reaction_count: prior,
            })
        })
        .collect()
}
