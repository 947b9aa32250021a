use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::MAX_QUERY_NIGHTS;
use crate::model::*;

use super::{Engine, EngineError, availability, transitions};

fn validate_query_range(range: &DateRange) -> Result<(), EngineError> {
    if range.check_out <= range.check_in {
        return Err(EngineError::InvalidArgument("check-out must be after check-in"));
    }
    if range.nights() > MAX_QUERY_NIGHTS {
        return Err(EngineError::LimitExceeded("query window too long"));
    }
    Ok(())
}

impl Engine {
    // ── Snapshots ────────────────────────────────────────────

    pub async fn room_info(&self, id: &Ulid) -> Option<RoomInfo> {
        let room = self.get_room(id)?;
        let guard = room.read().await;
        Some(RoomInfo::from_state(&guard))
    }

    pub async fn reservation_info(&self, id: &Ulid) -> Option<ReservationInfo> {
        let res = self.get_reservation(id)?;
        let guard = res.read().await;
        Some(ReservationInfo::from_aggregate(&guard))
    }

    pub async fn waitlist_info(&self, id: &Ulid) -> Option<WaitlistInfo> {
        let entry = self.get_waitlist_entry(id)?;
        let guard = entry.read().await;
        Some(WaitlistInfo::from_entry(&guard))
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let guard = arc.read().await;
            infos.push(RoomInfo::from_state(&guard));
        }
        infos.sort_by(|a, b| (a.branch_id, &a.number).cmp(&(b.branch_id, &b.number)));
        infos
    }

    // ── Availability ─────────────────────────────────────────

    /// Can this room host the given dates? Terminal reservations never block;
    /// their stays were retired when they settled.
    pub async fn check_availability(
        &self,
        room_id: &Ulid,
        range: &DateRange,
    ) -> Result<bool, EngineError> {
        validate_query_range(range)?;
        let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
        let guard = room.read().await;
        Ok(availability::is_available(&guard, range, None))
    }

    /// Per-room availability verdicts for an ad-hoc set of rooms. Unknown ids
    /// fail the whole query rather than silently vanishing from the map.
    pub async fn check_rooms_availability(
        &self,
        room_ids: &[Ulid],
        range: &DateRange,
    ) -> Result<HashMap<Ulid, bool>, EngineError> {
        validate_query_range(range)?;
        let mut verdicts = HashMap::with_capacity(room_ids.len());
        for room_id in room_ids {
            let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
            let guard = room.read().await;
            verdicts.insert(*room_id, availability::is_available(&guard, range, None));
        }
        Ok(verdicts)
    }

    /// Bookable rooms of one type at one branch for the given dates. Only
    /// rooms currently in `Available` qualify; Dirty or maintenance rooms are
    /// left out even when their ledger is clear.
    pub async fn available_rooms_by_type(
        &self,
        branch_id: Ulid,
        room_type_id: Ulid,
        range: &DateRange,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        self.discover_rooms(range, |room| {
            room.branch_id == branch_id && room.room_type_id == room_type_id
        })
        .await
    }

    /// Bookable rooms across all types at one branch.
    pub async fn available_rooms_by_branch(
        &self,
        branch_id: Ulid,
        range: &DateRange,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        self.discover_rooms(range, |room| room.branch_id == branch_id).await
    }

    async fn discover_rooms(
        &self,
        range: &DateRange,
        matches: impl Fn(&RoomState) -> bool,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        validate_query_range(range)?;
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            if matches(&guard) && availability::is_bookable_candidate(&guard, range) {
                found.push(RoomInfo::from_state(&guard));
            }
        }
        found.sort_by(|a, b| (a.price_per_night, &a.number).cmp(&(b.price_per_night, &b.number)));
        Ok(found)
    }

    /// Free sub-ranges of a room's ledger within a query window.
    pub async fn room_vacant_ranges(
        &self,
        room_id: &Ulid,
        window: &DateRange,
    ) -> Result<Vec<DateRange>, EngineError> {
        validate_query_range(window)?;
        let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
        let guard = room.read().await;
        Ok(availability::vacant_ranges(&guard, window))
    }

    // ── Reservations ─────────────────────────────────────────

    /// Reservations whose stays sit on this room's ledger, i.e. the active
    /// (non-terminal) bookings the room is committed to.
    pub async fn reservations_for_room(
        &self,
        room_id: &Ulid,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
        let reservation_ids: Vec<Ulid> = {
            let guard = room.read().await;
            guard.stays.iter().map(|s| s.reservation_id).collect()
        };

        let mut infos = Vec::with_capacity(reservation_ids.len());
        for id in reservation_ids {
            if let Some(res) = self.get_reservation(&id) {
                let guard = res.read().await;
                infos.push(ReservationInfo::from_aggregate(&guard));
            }
        }
        Ok(infos)
    }

    pub async fn reservations_for_guest(&self, guest_id: Ulid) -> Vec<ReservationInfo> {
        let arcs: Vec<_> = self.reservations.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            if guard.guest_id == guest_id {
                infos.push(ReservationInfo::from_aggregate(&guard));
            }
        }
        infos.sort_by_key(|r| (r.created_at, r.id));
        infos
    }

    /// Statuses reachable from the reservation's current status, ignoring
    /// temporal gates. For UI affordances; the actual transition re-checks
    /// everything under the write lock.
    pub async fn possible_transitions_for(
        &self,
        id: &Ulid,
    ) -> Result<&'static [ReservationStatus], EngineError> {
        let res = self.get_reservation(id).ok_or(EngineError::NotFound(*id))?;
        let guard = res.read().await;
        Ok(transitions::possible_transitions(guard.status))
    }

    // ── Waitlist ─────────────────────────────────────────────

    /// All waitlist entries, best offer candidates first.
    pub async fn list_waitlist(&self) -> Vec<WaitlistInfo> {
        let arcs: Vec<_> = self.waitlist.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let guard = arc.read().await;
            infos.push(WaitlistInfo::from_entry(&guard));
        }
        infos.sort_by_key(|w| (w.priority, w.requested_at, w.id));
        infos
    }

    pub async fn waitlist_for_guest(&self, guest_id: Ulid) -> Vec<WaitlistInfo> {
        let arcs: Vec<_> = self.waitlist.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            if guard.guest_id == guest_id {
                infos.push(WaitlistInfo::from_entry(&guard));
            }
        }
        infos.sort_by_key(|w| (w.requested_at, w.id));
        infos
    }

    /// Used by the admission check in `join_waitlist` callers and by tests.
    pub fn waitlist_len(&self) -> usize {
        self.waitlist.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }
}
