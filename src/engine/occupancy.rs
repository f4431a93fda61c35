//! Period-aware room occupancy.
//!
//! Stays are closed date intervals whose ends may be open. Two stays overlap
//! when each one has started by the time the other is over, so a departure on
//! the day of someone else's arrival counts as a shared night.

use chrono::NaiveDate;

use crate::model::Stay;

/// True if the two stays share at least one day.
pub fn periods_overlap(a: &Stay, b: &Stay) -> bool {
    a.lower().at_or_before(b.upper()) && b.lower().at_or_before(a.upper())
}

/// Number of occupant stays overlapping the candidate's stay.
///
/// The candidate must not be part of `occupants`; callers filter it out.
/// This is a pairwise count, not a peak: two occupants overlapping the
/// candidate on different days still count as two.
pub fn max_occupancy_during_period(occupants: &[Stay], candidate: &Stay) -> usize {
    occupants
        .iter()
        .filter(|stay| periods_overlap(stay, candidate))
        .count()
}

/// True if a participant with this stay is in the house on `day`.
pub fn present_on(stay: &Stay, day: NaiveDate) -> bool {
    periods_overlap(stay, &Stay::day(day))
}

/// Result of fitting a candidate stay into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomFit {
    /// Occupants whose stay overlaps the candidate's.
    pub overlapping: usize,
    /// Beds left during the candidate's stay ("2 frei im Zeitraum").
    pub free_slots: u32,
    pub has_space: bool,
}

pub fn room_fit(capacity: u32, occupants: &[Stay], candidate: &Stay) -> RoomFit {
    let overlapping = max_occupancy_during_period(occupants, candidate);
    let taken = u32::try_from(overlapping).unwrap_or(u32::MAX);
    RoomFit {
        overlapping,
        free_slots: capacity.saturating_sub(taken),
        has_space: taken < capacity,
    }
}
