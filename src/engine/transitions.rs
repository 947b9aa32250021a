use chrono::NaiveDate;

use crate::model::{Reservation, ReservationStatus};

use super::EngineError;

// ── Status Transition Engine ─────────────────────────────────────
//
// Explicit adjacency table rather than nested conditionals, so the closure
// property can be tested over the full status cross-product. Identity moves
// (X -> X) are always legal no-ops and bypass the temporal gates.

use ReservationStatus::*;

/// Legal non-identity targets from `current`.
pub fn allowed_targets(current: ReservationStatus) -> &'static [ReservationStatus] {
    match current {
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[CheckedIn, Cancelled],
        CheckedIn => &[CheckedOut],
        CheckedOut | Cancelled => &[],
    }
}

/// Pure table lookup: identity or adjacency-table membership.
pub fn is_valid_transition(current: ReservationStatus, requested: ReservationStatus) -> bool {
    current == requested || allowed_targets(current).contains(&requested)
}

/// Legal non-identity targets, for user-facing affordances and as a test oracle.
pub fn possible_transitions(current: ReservationStatus) -> &'static [ReservationStatus] {
    allowed_targets(current)
}

/// Decide whether `reservation` may move to `requested` as of `today`.
///
/// `today` is always caller-supplied; the engine never reads the system
/// clock here, which keeps the temporal gates deterministic under test.
/// Pure decision function: applying the status, persisting and cascading
/// into room state are the caller's job.
pub fn check_transition(
    reservation: &Reservation,
    requested: ReservationStatus,
    today: NaiveDate,
) -> Result<(), EngineError> {
    let current = reservation.status;
    if current == requested {
        return Ok(());
    }
    if !allowed_targets(current).contains(&requested) {
        return Err(EngineError::InvalidTransition {
            from: current,
            requested,
            allowed: allowed_targets(current),
        });
    }

    let range = &reservation.range;
    match requested {
        CheckedIn => {
            if today < range.check_in {
                return Err(EngineError::TransitionNotYetAllowed { earliest: range.check_in });
            }
            if today > range.check_out {
                return Err(EngineError::TransitionExpired { latest: range.check_out });
            }
        }
        CheckedOut => {
            if today < range.check_in {
                return Err(EngineError::TransitionNotYetAllowed { earliest: range.check_in });
            }
        }
        Confirmed => {
            if today > range.check_out {
                return Err(EngineError::TransitionExpired { latest: range.check_out });
            }
        }
        _ => {}
    }

    Ok(())
}
