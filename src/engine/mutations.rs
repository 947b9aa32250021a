use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, WalCommand, availability, sync, transitions};

/// What a successful transition did, for the caller's event publishing:
/// old status, new status, which rooms flipped, which waitlist entries got
/// their 24h window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub rooms_changed: Vec<Ulid>,
    pub waitlist_notified: Vec<Ulid>,
}

fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.check_out <= range.check_in {
        return Err(EngineError::InvalidArgument("check-out must be after check-in"));
    }
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

impl Engine {
    // ── Room administration ──────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        branch_id: Ulid,
        room_type_id: Ulid,
        floor: Option<i16>,
        number: String,
        price_per_night: Cents,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if number.is_empty() {
            return Err(EngineError::InvalidArgument("room number must not be empty"));
        }
        if number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("room number too long"));
        }
        if price_per_night <= 0 {
            return Err(EngineError::InvalidArgument("price per night must be positive"));
        }
        if price_per_night > MAX_PRICE_CENTS {
            return Err(EngineError::LimitExceeded("price per night too high"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(existing) = self.room_numbers.get(&(branch_id, number.clone())) {
            return Err(EngineError::AlreadyExists(*existing.value()));
        }

        let _gate = self.compact_gate.read().await;
        let event = Event::RoomCreated {
            id,
            branch_id,
            room_type_id,
            floor,
            number: number.clone(),
            price_per_night,
        };
        self.wal_append(&event).await?;
        let room = RoomState::new(id, branch_id, room_type_id, floor, number.clone(), price_per_night);
        self.room_numbers.insert((branch_id, number), id);
        self.rooms.insert(id, Arc::new(RwLock::new(room)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_room(
        &self,
        id: Ulid,
        floor: Option<i16>,
        price_per_night: Cents,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        if price_per_night <= 0 {
            return Err(EngineError::InvalidArgument("price per night must be positive"));
        }
        if price_per_night > MAX_PRICE_CENTS {
            return Err(EngineError::LimitExceeded("price per night too high"));
        }
        if let Some(ref n) = note
            && n.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("note too long"));
        }
        let room = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = room.write().await;

        let event = Event::RoomUpdated { id, floor, price_per_night, note: note.clone() };
        self.wal_append(&event).await?;
        guard.floor = floor;
        guard.price_per_night = price_per_night;
        guard.note = note;
        self.notify.send(id, &event);
        Ok(())
    }

    /// Administrative/housekeeping status flip. The room level has no FSM;
    /// anything goes, including Dirty -> Available after cleaning.
    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<(), EngineError> {
        let room = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = room.write().await;
        if guard.status == status {
            return Ok(());
        }

        let event = Event::RoomStatusChanged { id, status };
        self.wal_append(&event).await?;
        guard.status = status;
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let room = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = room.write().await;
        if !guard.stays.is_empty() {
            return Err(EngineError::RoomHasStays(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.room_numbers.remove(&(guard.branch_id, guard.number.clone()));
        drop(guard);
        self.rooms.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Booking ──────────────────────────────────────────────

    /// Book a set of rooms for a guest. All-or-nothing: write locks on every
    /// requested room are taken in ascending room-id order, availability is
    /// validated against the locked ledgers, and the stays are committed
    /// before any lock is released. Two concurrent requests for overlapping
    /// dates on the same room cannot both succeed.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        guest_id: Ulid,
        range: DateRange,
        room_ids: &[Ulid],
        services: &[(Ulid, u32, Cents)],
        created_at: Ms,
    ) -> Result<(), EngineError> {
        if guest_id.is_nil() {
            return Err(EngineError::InvalidArgument("guest id must be set"));
        }
        validate_range(&range)?;
        if room_ids.is_empty() {
            return Err(EngineError::InvalidArgument("reservation needs at least one room"));
        }
        if room_ids.len() > MAX_ROOMS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many rooms in one reservation"));
        }
        if services.len() > MAX_SERVICES_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        for &(_, quantity, unit_price) in services {
            if quantity == 0 {
                return Err(EngineError::InvalidArgument("service quantity must be positive"));
            }
            if quantity > MAX_SERVICE_QUANTITY {
                return Err(EngineError::LimitExceeded("service quantity too large"));
            }
            if unit_price < 0 {
                return Err(EngineError::InvalidArgument("service price must not be negative"));
            }
            if unit_price > MAX_PRICE_CENTS {
                return Err(EngineError::LimitExceeded("service price too high"));
            }
        }
        if self.reservations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let _gate = self.compact_gate.read().await;

        // Acquire write locks in sorted order to prevent deadlocks between
        // concurrent multi-room bookings.
        let mut sorted_ids: Vec<Ulid> = room_ids.to_vec();
        sorted_ids.sort();
        sorted_ids.dedup();

        let mut guards: Vec<OwnedRwLockWriteGuard<RoomState>> =
            Vec::with_capacity(sorted_ids.len());
        for room_id in &sorted_ids {
            let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
            guards.push(room.write_owned().await);
        }

        if let Err(conflicts) =
            availability::validate_rooms(guards.iter().map(|g| &**g), &range, None)
        {
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(EngineError::RoomsUnavailable(conflicts));
        }

        let mut res = Reservation::new(id, guest_id, range, created_at);
        for guard in &guards {
            res.add_room(guard.id, guard.price_per_night);
        }
        for &(service_id, quantity, unit_price) in services {
            res.add_service(service_id, quantity, unit_price);
        }
        res.calculate_total_cents();

        let event = Event::ReservationCreated {
            id,
            guest_id,
            range,
            created_at,
            rooms: res.rooms.clone(),
            services: res.services.clone(),
        };
        self.wal_append(&event).await?;

        for guard in &mut guards {
            guard.insert_stay(Stay { reservation_id: id, guest_id, range });
        }
        self.reservations.insert(id, Arc::new(RwLock::new(res)));
        self.notify.send(id, &event);
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(())
    }

    /// Move a reservation through its lifecycle. Applies the transition
    /// graph and temporal gates, then synchronizes room statuses, retires
    /// stays on terminal statuses and hands freed rooms to the waitlist —
    /// all under the reservation's and rooms' write locks, so no other
    /// worker observes a half-applied transition.
    ///
    /// `today` drives the temporal gates and `now` the waitlist hold window;
    /// both are caller-supplied, never read from the system clock here.
    pub async fn transition_reservation(
        &self,
        id: Ulid,
        requested: ReservationStatus,
        today: NaiveDate,
        now: Ms,
    ) -> Result<TransitionOutcome, EngineError> {
        let res = self.get_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let mut res_guard = res.write_owned().await;
        let from = res_guard.status;

        if from == requested {
            // Identity moves are legal no-ops.
            return Ok(TransitionOutcome {
                from,
                to: requested,
                rooms_changed: Vec::new(),
                waitlist_notified: Vec::new(),
            });
        }
        transitions::check_transition(&res_guard, requested, today)?;

        let mut room_ids = res_guard.room_ids();
        room_ids.sort();
        let mut room_guards: Vec<OwnedRwLockWriteGuard<RoomState>> =
            Vec::with_capacity(room_ids.len());
        for room_id in &room_ids {
            let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
            room_guards.push(room.write_owned().await);
        }

        let event = Event::ReservationStatusChanged { id, from, to: requested };
        self.wal_append(&event).await?;
        res_guard.status = requested;

        let mut rooms_changed = Vec::new();
        for guard in &mut room_guards {
            if let Some(next) = sync::sync_room(from, requested, guard.status) {
                let room_event = Event::RoomStatusChanged { id: guard.id, status: next };
                self.wal_append(&room_event).await?;
                guard.status = next;
                self.notify.send(guard.id, &room_event);
                rooms_changed.push(guard.id);
            }
        }

        if requested.is_terminal() {
            for guard in &mut room_guards {
                guard.remove_stay(id);
            }
        }

        // Any terminal transition retires stays: a cancellation reopens the
        // whole range, an early checkout the remaining nights. Offer the
        // reopened dates to waiting guests.
        let waitlist_notified = if requested.is_terminal() {
            self.offer_to_waitlist(&room_guards, now).await?
        } else {
            Vec::new()
        };

        self.notify.send(id, &event);
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => requested.as_str())
            .increment(1);
        info!(
            reservation = %id,
            from = from.as_str(),
            to = requested.as_str(),
            "reservation transition"
        );

        Ok(TransitionOutcome { from, to: requested, rooms_changed, waitlist_notified })
    }

    /// Move a pending/confirmed reservation to new dates, re-validating every
    /// room with the reservation's own stays excluded from the conflict scan.
    /// The vacated dates are offered to the waitlist; returns the notified
    /// entry ids.
    pub async fn reschedule_reservation(
        &self,
        id: Ulid,
        new_range: DateRange,
        now: Ms,
    ) -> Result<Vec<Ulid>, EngineError> {
        validate_range(&new_range)?;
        let res = self.get_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let mut res_guard = res.write_owned().await;
        if !matches!(
            res_guard.status,
            ReservationStatus::Pending | ReservationStatus::Confirmed
        ) {
            return Err(EngineError::InvalidArgument(
                "only pending or confirmed reservations can be rescheduled",
            ));
        }

        let mut room_ids = res_guard.room_ids();
        room_ids.sort();
        let mut room_guards: Vec<OwnedRwLockWriteGuard<RoomState>> =
            Vec::with_capacity(room_ids.len());
        for room_id in &room_ids {
            let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
            room_guards.push(room.write_owned().await);
        }

        if let Err(conflicts) =
            availability::validate_rooms(room_guards.iter().map(|g| &**g), &new_range, Some(id))
        {
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(EngineError::RoomsUnavailable(conflicts));
        }

        let event = Event::ReservationRescheduled { id, range: new_range };
        self.wal_append(&event).await?;

        res_guard.range = new_range;
        res_guard.calculate_total_cents();
        let guest_id = res_guard.guest_id;
        for guard in &mut room_guards {
            guard.remove_stay(id);
            guard.insert_stay(Stay { reservation_id: id, guest_id, range: new_range });
        }

        // The old dates just reopened.
        let notified = self.offer_to_waitlist(&room_guards, now).await?;
        self.notify.send(id, &event);
        Ok(notified)
    }

    // ── Waitlist ─────────────────────────────────────────────

    pub async fn join_waitlist(
        &self,
        id: Ulid,
        guest_id: Ulid,
        room_type_id: Ulid,
        branch_id: Ulid,
        range: DateRange,
        priority: i32,
        requested_at: Ms,
    ) -> Result<(), EngineError> {
        if guest_id.is_nil() {
            return Err(EngineError::InvalidArgument("guest id must be set"));
        }
        validate_range(&range)?;
        if self.waitlist.len() >= MAX_WAITLIST_ENTRIES {
            return Err(EngineError::LimitExceeded("waitlist full"));
        }
        if self.waitlist.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let _gate = self.compact_gate.read().await;
        let event = Event::WaitlistJoined {
            id,
            guest_id,
            room_type_id,
            branch_id,
            range,
            priority,
            requested_at,
        };
        self.wal_append(&event).await?;
        let entry = WaitlistEntry {
            id,
            guest_id,
            room_type_id,
            branch_id,
            range,
            status: WaitlistStatus::Active,
            priority,
            requested_at,
            notified_at: None,
            expires_at: None,
        };
        self.waitlist.insert(id, Arc::new(RwLock::new(entry)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Guest withdraws. Legal from Active or Notified only.
    pub async fn cancel_waitlist(&self, id: Ulid) -> Result<(), EngineError> {
        let entry = self.get_waitlist_entry(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = entry.write().await;
        if guard.status.is_terminal() {
            return Err(EngineError::InvalidArgument("waitlist entry already settled"));
        }

        let event = Event::WaitlistCancelled { id };
        self.wal_append(&event).await?;
        guard.status = WaitlistStatus::Cancelled;
        self.notify.send(id, &event);
        Ok(())
    }

    /// Guest completed a booking inside the hold window. Compare-and-set
    /// against Notified so a racing expiry sweep loses cleanly.
    pub async fn convert_waitlist(&self, id: Ulid, now: Ms) -> Result<(), EngineError> {
        let entry = self.get_waitlist_entry(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = entry.write().await;
        match guard.status {
            WaitlistStatus::Notified => {
                if guard.expires_at.is_some_and(|exp| exp <= now) {
                    return Err(EngineError::WaitlistWindowClosed(id));
                }
            }
            WaitlistStatus::Active => {
                return Err(EngineError::InvalidArgument("waitlist entry not yet notified"));
            }
            _ => {
                return Err(EngineError::InvalidArgument("waitlist entry already settled"));
            }
        }

        let event = Event::WaitlistConverted { id };
        self.wal_append(&event).await?;
        guard.status = WaitlistStatus::Converted;
        self.notify.send(id, &event);
        metrics::counter!(observability::WAITLIST_CONVERTED_TOTAL).increment(1);
        Ok(())
    }

    /// Expire one notified entry whose window has lapsed. Returns false when
    /// the entry raced into another state first (e.g. a concurrent
    /// conversion) — the sweep treats that as already handled.
    pub async fn expire_waitlist_entry(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let entry = self.get_waitlist_entry(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = entry.write().await;
        let due = guard.status == WaitlistStatus::Notified
            && guard.expires_at.is_some_and(|exp| exp <= now);
        if !due {
            return Ok(false);
        }

        let event = Event::WaitlistExpired { id };
        self.wal_append(&event).await?;
        guard.status = WaitlistStatus::Expired;
        self.notify.send(id, &event);
        metrics::counter!(observability::WAITLIST_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    /// Snapshot of notified entries whose hold window has lapsed.
    pub fn collect_expired_waitlist(&self, now: Ms) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.waitlist.iter() {
            let arc = entry.value().clone();
            if let Ok(guard) = arc.try_read()
                && guard.status == WaitlistStatus::Notified
                && guard.expires_at.is_some_and(|exp| exp <= now)
            {
                expired.push(guard.id);
            }
        }
        expired
    }

    /// For each freed room, offer the dates to the best-matching active
    /// waitlist entry: same branch and room type, requested range now clear.
    /// Lowest priority value wins, then earliest request.
    async fn offer_to_waitlist(
        &self,
        freed_rooms: &[OwnedRwLockWriteGuard<RoomState>],
        now: Ms,
    ) -> Result<Vec<Ulid>, EngineError> {
        let mut notified = Vec::new();
        for room in freed_rooms {
            let mut best: Option<(i32, Ms, Ulid)> = None;
            for entry in self.waitlist.iter() {
                let arc = entry.value().clone();
                let Ok(guard) = arc.try_read() else { continue };
                if guard.status != WaitlistStatus::Active
                    || guard.branch_id != room.branch_id
                    || guard.room_type_id != room.room_type_id
                    || !availability::is_available(room, &guard.range, None)
                {
                    continue;
                }
                let key = (guard.priority, guard.requested_at, guard.id);
                if best.is_none_or(|b| key < b) {
                    best = Some(key);
                }
            }

            let Some((_, _, entry_id)) = best else { continue };
            let entry = match self.get_waitlist_entry(&entry_id) {
                Some(e) => e,
                None => continue,
            };
            let mut guard = entry.write().await;
            if guard.status != WaitlistStatus::Active {
                continue; // raced with cancel — pick nobody this round
            }

            let event = Event::WaitlistNotified {
                id: entry_id,
                notified_at: now,
                expires_at: now + WAITLIST_HOLD_MS,
            };
            self.wal_append(&event).await?;
            guard.status = WaitlistStatus::Notified;
            guard.notified_at = Some(now);
            guard.expires_at = Some(now + WAITLIST_HOLD_MS);
            self.notify.send(entry_id, &event);
            metrics::counter!(observability::WAITLIST_NOTIFIED_TOTAL).increment(1);
            info!(entry = %entry_id, room = %room.id, "waitlist entry notified");
            notified.push(entry_id);
        }
        Ok(notified)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Write side of the gate: no create is between its append and its
        // state insert while the snapshot runs. Entity reads below block on
        // in-flight mutations rather than panicking on contention.
        let _gate = self.compact_gate.write().await;
        let mut events = Vec::new();

        // Rooms first: reservation replay inserts stays into existing rooms.
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for arc in rooms {
            let guard = arc.read().await;
            events.push(Event::RoomCreated {
                id: guard.id,
                branch_id: guard.branch_id,
                room_type_id: guard.room_type_id,
                floor: guard.floor,
                number: guard.number.clone(),
                price_per_night: guard.price_per_night,
            });
            if guard.note.is_some() {
                events.push(Event::RoomUpdated {
                    id: guard.id,
                    floor: guard.floor,
                    price_per_night: guard.price_per_night,
                    note: guard.note.clone(),
                });
            }
            if guard.status != RoomStatus::Available {
                events.push(Event::RoomStatusChanged { id: guard.id, status: guard.status });
            }
        }

        let reservations: Vec<_> = self.reservations.iter().map(|e| e.value().clone()).collect();
        for arc in reservations {
            let guard = arc.read().await;
            events.push(Event::ReservationCreated {
                id: guard.id,
                guest_id: guard.guest_id,
                range: guard.range,
                created_at: guard.created_at,
                rooms: guard.rooms.clone(),
                services: guard.services.clone(),
            });
            if guard.status != ReservationStatus::Pending {
                // Replay applies the target status directly; `from` is
                // informational in a compacted log.
                events.push(Event::ReservationStatusChanged {
                    id: guard.id,
                    from: ReservationStatus::Pending,
                    to: guard.status,
                });
            }
        }

        let waitlist: Vec<_> = self.waitlist.iter().map(|e| e.value().clone()).collect();
        for arc in waitlist {
            let guard = arc.read().await;
            events.push(Event::WaitlistJoined {
                id: guard.id,
                guest_id: guard.guest_id,
                room_type_id: guard.room_type_id,
                branch_id: guard.branch_id,
                range: guard.range,
                priority: guard.priority,
                requested_at: guard.requested_at,
            });
            if let (Some(notified_at), Some(expires_at)) = (guard.notified_at, guard.expires_at) {
                events.push(Event::WaitlistNotified { id: guard.id, notified_at, expires_at });
            }
            match guard.status {
                WaitlistStatus::Converted => events.push(Event::WaitlistConverted { id: guard.id }),
                WaitlistStatus::Expired => events.push(Event::WaitlistExpired { id: guard.id }),
                WaitlistStatus::Cancelled => events.push(Event::WaitlistCancelled { id: guard.id }),
                WaitlistStatus::Active | WaitlistStatus::Notified => {}
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
