//! Hard operational limits. Every externally-supplied collection or string is
//! bounded before it reaches the engine state.

use crate::model::{Cents, Ms};

/// Max rooms a single property engine will hold.
pub const MAX_ROOMS_PER_PROPERTY: usize = 100_000;

/// Max rooms attached to one reservation.
pub const MAX_ROOMS_PER_RESERVATION: usize = 16;

/// Max service line items attached to one reservation.
pub const MAX_SERVICES_PER_RESERVATION: usize = 64;

/// Max length of a stay in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Max window for vacancy queries, in nights.
pub const MAX_QUERY_NIGHTS: i64 = 730;

/// Max room number length ("1204", "PH-2", ...).
pub const MAX_ROOM_NUMBER_LEN: usize = 16;

/// Max maintenance note length.
pub const MAX_NOTE_LEN: usize = 512;

/// Max nightly room price or service unit price. Keeps every reservation
/// total far below `i64::MAX` even at `MAX_STAY_NIGHTS` with full room and
/// service line-item counts.
pub const MAX_PRICE_CENTS: Cents = 10_000_000_00;

/// Max units on one service line item.
pub const MAX_SERVICE_QUANTITY: u32 = 1_000;

/// Max open waitlist entries per property.
pub const MAX_WAITLIST_ENTRIES: usize = 10_000;

/// How long a notified waitlist guest has to convert before expiring.
pub const WAITLIST_HOLD_MS: Ms = 24 * 3_600_000;

/// Max properties one manager will load.
pub const MAX_PROPERTIES: usize = 1_024;

/// Max property name length.
pub const MAX_PROPERTY_NAME_LEN: usize = 256;
