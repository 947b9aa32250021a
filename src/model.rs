use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only wall-clock type.
pub type Ms = i64;

/// Minor currency units — the only money type.
pub type Cents = i64;

/// Half-open stay range `[check_in, check_out)`. The check-out day is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl DateRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "check-in must precede check-out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.check_in <= day && day < self.check_out
    }
}

/// Physical room state. No FSM here — legality of status flips is owned by the
/// synchronizer and by housekeeping callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Booked,
    Occupied,
    Dirty,
    OutOfOrder,
    ReadyForInspection,
    UnderMaintenance,
    Blocked,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Booked => "booked",
            RoomStatus::Occupied => "occupied",
            RoomStatus::Dirty => "dirty",
            RoomStatus::OutOfOrder => "out_of_order",
            RoomStatus::ReadyForInspection => "ready_for_inspection",
            RoomStatus::UnderMaintenance => "under_maintenance",
            RoomStatus::Blocked => "blocked",
        }
    }
}

/// Reservation lifecycle. Transitions are enforced by `engine::transitions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

/// All statuses, for iterating the full transition cross-product.
pub const ALL_RESERVATION_STATUSES: [ReservationStatus; 5] = [
    ReservationStatus::Pending,
    ReservationStatus::Confirmed,
    ReservationStatus::CheckedIn,
    ReservationStatus::CheckedOut,
    ReservationStatus::Cancelled,
];

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::CheckedOut | ReservationStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::CheckedOut => "checked_out",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

/// One reservation's claim on one room. Lives on the room's stay ledger for
/// exactly as long as the owning reservation is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub reservation_id: Ulid,
    pub guest_id: Ulid,
    pub range: DateRange,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub branch_id: Ulid,
    pub room_type_id: Ulid,
    pub floor: Option<i16>,
    /// Display number, unique within the branch.
    pub number: String,
    pub price_per_night: Cents,
    pub status: RoomStatus,
    pub note: Option<String>,
    /// Active stays, sorted by `range.check_in`.
    pub stays: Vec<Stay>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        branch_id: Ulid,
        room_type_id: Ulid,
        floor: Option<i16>,
        number: String,
        price_per_night: Cents,
    ) -> Self {
        Self {
            id,
            branch_id,
            room_type_id,
            floor,
            number,
            price_per_night,
            status: RoomStatus::Available,
            note: None,
            stays: Vec::new(),
        }
    }

    /// Insert a stay maintaining sort order by check-in.
    pub fn insert_stay(&mut self, stay: Stay) {
        let pos = self
            .stays
            .binary_search_by_key(&stay.range.check_in, |s| s.range.check_in)
            .unwrap_or_else(|e| e);
        self.stays.insert(pos, stay);
    }

    /// Remove the stay owned by `reservation_id`, if present.
    pub fn remove_stay(&mut self, reservation_id: Ulid) -> Option<Stay> {
        if let Some(pos) = self.stays.iter().position(|s| s.reservation_id == reservation_id) {
            Some(self.stays.remove(pos))
        } else {
            None
        }
    }

    /// Only stays whose range overlaps the query window.
    /// Binary search skips stays checking in at or after `query.check_out`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Stay> {
        let right_bound = self
            .stays
            .partition_point(|s| s.range.check_in < query.check_out);
        self.stays[..right_bound]
            .iter()
            .filter(move |s| s.range.check_out > query.check_in)
    }
}

/// Room line item: the nightly price is snapshotted at booking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRoom {
    pub room_id: Ulid,
    pub price_per_night: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationService {
    pub service_id: Ulid,
    pub quantity: u32,
    pub unit_price: Cents,
}

impl ReservationService {
    pub fn total(&self) -> Cents {
        self.unit_price * self.quantity as Cents
    }
}

/// Aggregate root: a guest's booking of one or more rooms and optional
/// services over a date range. Line items are append-only; `total_cents` is
/// derived and only valid after `calculate_total_cents`.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub range: DateRange,
    pub created_at: Ms,
    pub status: ReservationStatus,
    pub total_cents: Cents,
    pub rooms: Vec<ReservationRoom>,
    pub services: Vec<ReservationService>,
}

impl Reservation {
    pub fn new(id: Ulid, guest_id: Ulid, range: DateRange, created_at: Ms) -> Self {
        debug_assert!(!guest_id.is_nil(), "guest id must be set");
        debug_assert!(range.nights() >= 1, "stay must be at least one night");
        Self {
            id,
            guest_id,
            range,
            created_at,
            status: ReservationStatus::Pending,
            total_cents: 0,
            rooms: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn add_room(&mut self, room_id: Ulid, price_per_night: Cents) {
        self.rooms.push(ReservationRoom { room_id, price_per_night });
    }

    pub fn add_service(&mut self, service_id: Ulid, quantity: u32, unit_price: Cents) {
        self.services.push(ReservationService { service_id, quantity, unit_price });
    }

    /// Recompute and overwrite the total: Σ room price × nights + Σ service
    /// totals. Not auto-triggered — callers recompute after mutating line
    /// items or dates.
    pub fn calculate_total_cents(&mut self) -> Cents {
        let nights = self.range.nights();
        let room_total: Cents = self.rooms.iter().map(|r| r.price_per_night * nights).sum();
        let service_total: Cents = self.services.iter().map(|s| s.total()).sum();
        let total = room_total + service_total;
        debug_assert!(total >= 0, "total cost must not go negative");
        self.total_cents = total;
        total
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|r| r.room_id).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitlistStatus {
    Active,
    Notified,
    Converted,
    Expired,
    Cancelled,
}

impl WaitlistStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WaitlistStatus::Converted | WaitlistStatus::Expired | WaitlistStatus::Cancelled
        )
    }
}

/// A guest waiting for a room type over a date range that was full at request
/// time. Notified entries carry a 24h conversion window.
#[derive(Debug, Clone)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub room_type_id: Ulid,
    pub branch_id: Ulid,
    pub range: DateRange,
    pub status: WaitlistStatus,
    /// Lower value is served first. Default 0.
    pub priority: i32,
    pub requested_at: Ms,
    pub notified_at: Option<Ms>,
    pub expires_at: Option<Ms>,
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        branch_id: Ulid,
        room_type_id: Ulid,
        floor: Option<i16>,
        number: String,
        price_per_night: Cents,
    },
    RoomUpdated {
        id: Ulid,
        floor: Option<i16>,
        price_per_night: Cents,
        note: Option<String>,
    },
    RoomStatusChanged {
        id: Ulid,
        status: RoomStatus,
    },
    RoomDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        guest_id: Ulid,
        range: DateRange,
        created_at: Ms,
        rooms: Vec<ReservationRoom>,
        services: Vec<ReservationService>,
    },
    ReservationStatusChanged {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    ReservationRescheduled {
        id: Ulid,
        range: DateRange,
    },
    WaitlistJoined {
        id: Ulid,
        guest_id: Ulid,
        room_type_id: Ulid,
        branch_id: Ulid,
        range: DateRange,
        priority: i32,
        requested_at: Ms,
    },
    WaitlistNotified {
        id: Ulid,
        notified_at: Ms,
        expires_at: Ms,
    },
    WaitlistConverted {
        id: Ulid,
    },
    WaitlistExpired {
        id: Ulid,
    },
    WaitlistCancelled {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub branch_id: Ulid,
    pub room_type_id: Ulid,
    pub floor: Option<i16>,
    pub number: String,
    pub price_per_night: Cents,
    pub status: RoomStatus,
}

impl RoomInfo {
    pub fn from_state(rs: &RoomState) -> Self {
        Self {
            id: rs.id,
            branch_id: rs.branch_id,
            room_type_id: rs.room_type_id,
            floor: rs.floor,
            number: rs.number.clone(),
            price_per_night: rs.price_per_night,
            status: rs.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub range: DateRange,
    pub status: ReservationStatus,
    pub total_cents: Cents,
    pub room_ids: Vec<Ulid>,
    pub created_at: Ms,
}

impl ReservationInfo {
    pub fn from_aggregate(res: &Reservation) -> Self {
        Self {
            id: res.id,
            guest_id: res.guest_id,
            range: res.range,
            status: res.status,
            total_cents: res.total_cents,
            room_ids: res.room_ids(),
            created_at: res.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistInfo {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub room_type_id: Ulid,
    pub branch_id: Ulid,
    pub range: DateRange,
    pub status: WaitlistStatus,
    pub priority: i32,
    pub requested_at: Ms,
    pub expires_at: Option<Ms>,
}

impl WaitlistInfo {
    pub fn from_entry(entry: &WaitlistEntry) -> Self {
        Self {
            id: entry.id,
            guest_id: entry.guest_id,
            room_type_id: entry.room_type_id,
            branch_id: entry.branch_id,
            range: entry.range,
            status: entry.status,
            priority: entry.priority,
            requested_at: entry.requested_at,
            expires_at: entry.expires_at,
        }
    }
}
