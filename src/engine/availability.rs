use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

// ── Availability Checker ─────────────────────────────────────────
//
// Pure functions over room snapshots. Nothing here touches storage or locks;
// the mutation layer holds the room write locks for the duration of
// check-plus-commit, which is what closes the check-then-act race.
//
// A room's stay ledger only carries stays of non-terminal reservations
// (cancelled and checked-out stays are retired by the synchronizer), so
// scanning the ledger is exactly the "ignore Cancelled/CheckedOut" filter.

/// True if the room has no stay overlapping `range`, ignoring the stay owned
/// by `exclude` (used when re-validating an in-place reschedule).
pub fn is_available(room: &RoomState, range: &DateRange, exclude: Option<Ulid>) -> bool {
    !room
        .overlapping(range)
        .any(|s| exclude != Some(s.reservation_id))
}

/// Per-room availability, checked independently — no cross-room constraint.
pub fn check_bulk_availability<'a>(
    rooms: impl IntoIterator<Item = &'a RoomState>,
    range: &DateRange,
) -> HashMap<Ulid, bool> {
    rooms
        .into_iter()
        .map(|room| (room.id, is_available(room, range, None)))
        .collect()
}

/// Validate a whole booking: returns every conflicting room id, not just the
/// first, so the caller can offer alternatives.
pub fn validate_rooms<'a>(
    rooms: impl IntoIterator<Item = &'a RoomState>,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), Vec<Ulid>> {
    let conflicts: Vec<Ulid> = rooms
        .into_iter()
        .filter(|room| !is_available(room, range, exclude))
        .map(|room| room.id)
        .collect();
    if conflicts.is_empty() { Ok(()) } else { Err(conflicts) }
}

/// Discovery precheck: a room is a candidate for new bookings only while its
/// physical status is Available. Rooms under maintenance, blocked or out of
/// order are conservatively excluded even if the requested dates are clear;
/// a direct booking of a named room consults only the stay ledger.
pub fn is_bookable_candidate(room: &RoomState, range: &DateRange) -> bool {
    room.status == RoomStatus::Available && is_available(room, range, None)
}

/// Date ranges within `query` where the room has no stay. Gaps between
/// back-to-back stays are reported; a gap of zero nights is not.
pub fn vacant_ranges(room: &RoomState, query: &DateRange) -> Vec<DateRange> {
    let mut busy: Vec<DateRange> = room
        .overlapping(query)
        .map(|s| DateRange {
            check_in: s.range.check_in.max(query.check_in),
            check_out: s.range.check_out.min(query.check_out),
        })
        .collect();
    busy.sort_by_key(|r| r.check_in);
    subtract_ranges(&[*query], &merge_overlapping(&busy))
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.check_in <= last.check_out
        {
            last.check_out = last.check_out.max(range.check_out);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Subtract sorted disjoint `to_remove` ranges from sorted `base` ranges.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.check_in;
        let current_end = b.check_out;

        while ri < to_remove.len() && to_remove[ri].check_out <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < current_end {
            let r = &to_remove[j];
            if r.check_in > current_start {
                result.push(DateRange::new(current_start, r.check_in));
            }
            current_start = current_start.max(r.check_out);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateRange::new(current_start, current_end));
        }
    }

    result
}
