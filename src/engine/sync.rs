use crate::model::{ReservationStatus, RoomState, RoomStatus};
use ulid::Ulid;

// ── Room/Reservation Status Synchronizer ─────────────────────────
//
// Propagates a reservation status change into the status of every attached
// room. Each branch only flips rooms that are not already in the target
// state, so running the sync twice with the same arguments is a no-op the
// second time.
//
// Checkout routes rooms through Dirty rather than straight back to
// Available; housekeeping returns them via set_room_status once cleaned.

/// Room status implied by a reservation status, without performing the flip.
pub fn target_room_status(new: ReservationStatus) -> RoomStatus {
    match new {
        ReservationStatus::CheckedIn => RoomStatus::Occupied,
        ReservationStatus::CheckedOut => RoomStatus::Dirty,
        ReservationStatus::Cancelled => RoomStatus::Available,
        _ => RoomStatus::Available,
    }
}

/// Per-room sync decision. Returns the status the room should move to, or
/// `None` when the room is already where it should be (or the transition
/// does not touch rooms at all).
///
/// `prior` guards the cancellation branch: a cancellation issued after
/// check-in must not free rooms a guest is still occupying.
pub fn sync_room(
    prior: ReservationStatus,
    new: ReservationStatus,
    current: RoomStatus,
) -> Option<RoomStatus> {
    match new {
        ReservationStatus::CheckedIn => {
            (current != RoomStatus::Occupied).then_some(RoomStatus::Occupied)
        }
        ReservationStatus::CheckedOut => {
            (current == RoomStatus::Occupied).then_some(RoomStatus::Dirty)
        }
        ReservationStatus::Cancelled
            if matches!(prior, ReservationStatus::Pending | ReservationStatus::Confirmed) =>
        {
            matches!(current, RoomStatus::Occupied | RoomStatus::Booked)
                .then_some(RoomStatus::Available)
        }
        _ => None,
    }
}

/// Apply the sync across a set of rooms, mutating in place. Returns the ids
/// of rooms whose status actually changed, for event emission and
/// idempotence verification.
pub fn sync_rooms(
    prior: ReservationStatus,
    new: ReservationStatus,
    rooms: &mut [RoomState],
) -> Vec<Ulid> {
    let mut changed = Vec::new();
    for room in rooms {
        if let Some(next) = sync_room(prior, new, room.status) {
            room.status = next;
            changed.push(room.id);
        }
    }
    changed
}
