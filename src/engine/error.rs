use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationStatus;

/// All engine failures are local, synchronous and caller-recoverable. Retry
/// policy lives with the caller.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed input, rejected before any mutation.
    InvalidArgument(&'static str),
    /// One or more requested rooms conflict with an existing stay.
    /// Carries every conflicting room id, not just the first.
    RoomsUnavailable(Vec<Ulid>),
    /// The requested status is not reachable from the current one.
    InvalidTransition {
        from: ReservationStatus,
        requested: ReservationStatus,
        allowed: &'static [ReservationStatus],
    },
    /// Graph-legal transition gated by the calendar; retry on or after `earliest`.
    TransitionNotYetAllowed { earliest: NaiveDate },
    /// Graph-legal transition whose window has passed.
    TransitionExpired { latest: NaiveDate },
    /// Room still carries active stays and cannot be deleted.
    RoomHasStays(Ulid),
    /// Waitlist conversion attempted after the 24h hold window closed.
    WaitlistWindowClosed(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::RoomsUnavailable(rooms) => {
                write!(f, "rooms unavailable for requested dates: {rooms:?}")
            }
            EngineError::InvalidTransition { from, requested, allowed } => {
                write!(
                    f,
                    "cannot move reservation from {} to {}; allowed: {:?}",
                    from.as_str(),
                    requested.as_str(),
                    allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>()
                )
            }
            EngineError::TransitionNotYetAllowed { earliest } => {
                write!(f, "transition not yet allowed before {earliest}")
            }
            EngineError::TransitionExpired { latest } => {
                write!(f, "transition window closed after {latest}")
            }
            EngineError::RoomHasStays(id) => {
                write!(f, "cannot delete room {id}: active stays attached")
            }
            EngineError::WaitlistWindowClosed(id) => {
                write!(f, "waitlist hold window closed for entry {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
