//! Pure pairing rules, kept apart from the SQL that enforces them so the
//! predicate can be unit-tested without a store.

use crate::domains::matchmaking::models::WaitingEntry;

/// Effective tolerance after a number of sweep widenings.
pub fn tolerance_after_ticks(base_tolerance: i32, tolerance_step: i32, ticks: i32) -> i32 {
    base_tolerance + tolerance_step * ticks
}

/// Two ratings are compatible when their distance fits inside BOTH tolerance
/// bands. Using the stricter side means a freshly enqueued player is never
/// handed an opponent further away than their own band allows, no matter how
/// long the other side has waited.
pub fn within_tolerance(rating_a: i32, tolerance_a: i32, rating_b: i32, tolerance_b: i32) -> bool {
    (rating_a - rating_b).abs() <= tolerance_a.min(tolerance_b)
}

/// Pick the closest compatible opponent for `entry` from `pool`, mirroring
/// the claim query: same mode and duration, distance within both bands,
/// smallest distance first, older enqueue breaking ties.
pub fn best_candidate<'a>(
    entry: &WaitingEntry,
    pool: &'a [WaitingEntry],
) -> Option<&'a WaitingEntry> {
    pool.iter()
        .filter(|other| {
            other.id != entry.id
                && other.user_id != entry.user_id
                && other.mode == entry.mode
                && other.duration_secs == entry.duration_secs
                && within_tolerance(
                    entry.skill_rating,
                    entry.tolerance,
                    other.skill_rating,
                    other.tolerance,
                )
        })
        .min_by_key(|other| {
            (
                (other.skill_rating - entry.skill_rating).abs(),
                other.enqueued_at,
            )
        })
}
