mod availability;
mod error;
mod mutations;
mod queries;
mod sync;
mod transitions;

pub use availability::{
    check_bulk_availability, is_available, is_bookable_candidate, merge_overlapping,
    subtract_ranges, vacant_ranges, validate_rooms,
};
pub use error::EngineError;
pub use mutations::TransitionOutcome;
pub use sync::{sync_room, sync_rooms, target_room_status};
pub use transitions::{allowed_targets, check_transition, is_valid_transition, possible_transitions};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::EventHub;
use crate::wal::Wal;

pub type SharedRoom = Arc<RwLock<RoomState>>;
pub type SharedReservation = Arc<RwLock<Reservation>>;
pub type SharedWaitlistEntry = Arc<RwLock<WaitlistEntry>>;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One property's booking engine: rooms, reservations and waitlist, backed by
/// a WAL and guarded by per-entity `RwLock`s.
///
/// Lock ordering, strictly observed by every mutation:
/// reservation lock → room locks in ascending room id → waitlist entry lock.
/// Bookings that touch several rooms take all room locks (sorted, deduped)
/// before checking availability, so two multi-room bookings can never
/// deadlock, and the availability check plus commit happen under the same
/// locks — the check-then-act race cannot double-book.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoom>,
    reservations: DashMap<Ulid, SharedReservation>,
    waitlist: DashMap<Ulid, SharedWaitlistEntry>,
    /// (branch id, room number) → room id; numbers are unique per branch.
    room_numbers: DashMap<(Ulid, String), Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Creates hold the read side across their append + state insert;
    /// compaction holds the write side across its snapshot. Without it a
    /// new entity could miss both the snapshot and the rewritten log.
    /// Lock order: gate before entity locks.
    compact_gate: RwLock<()>,
    pub notify: Arc<EventHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<EventHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            waitlist: DashMap::new(),
            room_numbers: DashMap::new(),
            wal_tx,
            compact_gate: RwLock::new(()),
            notify,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy property loading).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated { id, branch_id, room_type_id, floor, number, price_per_night } => {
                let room = RoomState::new(
                    *id,
                    *branch_id,
                    *room_type_id,
                    *floor,
                    number.clone(),
                    *price_per_night,
                );
                self.room_numbers.insert((*branch_id, number.clone()), *id);
                self.rooms.insert(*id, Arc::new(RwLock::new(room)));
            }
            Event::RoomUpdated { id, floor, price_per_night, note } => {
                if let Some(entry) = self.rooms.get(id) {
                    let room = entry.value().clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    guard.floor = *floor;
                    guard.price_per_night = *price_per_night;
                    guard.note = note.clone();
                }
            }
            Event::RoomStatusChanged { id, status } => {
                if let Some(entry) = self.rooms.get(id) {
                    let room = entry.value().clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    guard.status = *status;
                }
            }
            Event::RoomDeleted { id } => {
                if let Some((_, room)) = self.rooms.remove(id) {
                    let guard = room.try_read().expect("replay: uncontended read");
                    self.room_numbers.remove(&(guard.branch_id, guard.number.clone()));
                }
            }
            Event::ReservationCreated { id, guest_id, range, created_at, rooms, services } => {
                let mut res = Reservation::new(*id, *guest_id, *range, *created_at);
                for line in rooms {
                    res.add_room(line.room_id, line.price_per_night);
                }
                for line in services {
                    res.add_service(line.service_id, line.quantity, line.unit_price);
                }
                res.calculate_total_cents();

                for line in rooms {
                    if let Some(entry) = self.rooms.get(&line.room_id) {
                        let room = entry.value().clone();
                        let mut guard = room.try_write().expect("replay: uncontended write");
                        guard.insert_stay(Stay {
                            reservation_id: *id,
                            guest_id: *guest_id,
                            range: *range,
                        });
                    }
                }
                self.reservations.insert(*id, Arc::new(RwLock::new(res)));
            }
            Event::ReservationStatusChanged { id, to, .. } => {
                // Room statuses are replayed from their own RoomStatusChanged
                // events; here only the aggregate and the stay ledgers move.
                if let Some(entry) = self.reservations.get(id) {
                    let res = entry.value().clone();
                    let mut guard = res.try_write().expect("replay: uncontended write");
                    guard.status = *to;
                    if to.is_terminal() {
                        for room_id in guard.room_ids() {
                            if let Some(room_entry) = self.rooms.get(&room_id) {
                                let room = room_entry.value().clone();
                                let mut room_guard =
                                    room.try_write().expect("replay: uncontended write");
                                room_guard.remove_stay(*id);
                            }
                        }
                    }
                }
            }
            Event::ReservationRescheduled { id, range } => {
                if let Some(entry) = self.reservations.get(id) {
                    let res = entry.value().clone();
                    let mut guard = res.try_write().expect("replay: uncontended write");
                    guard.range = *range;
                    guard.calculate_total_cents();
                    let guest_id = guard.guest_id;
                    for room_id in guard.room_ids() {
                        if let Some(room_entry) = self.rooms.get(&room_id) {
                            let room = room_entry.value().clone();
                            let mut room_guard =
                                room.try_write().expect("replay: uncontended write");
                            room_guard.remove_stay(*id);
                            room_guard.insert_stay(Stay {
                                reservation_id: *id,
                                guest_id,
                                range: *range,
                            });
                        }
                    }
                }
            }
            Event::WaitlistJoined {
                id,
                guest_id,
                room_type_id,
                branch_id,
                range,
                priority,
                requested_at,
            } => {
                let entry = WaitlistEntry {
                    id: *id,
                    guest_id: *guest_id,
                    room_type_id: *room_type_id,
                    branch_id: *branch_id,
                    range: *range,
                    status: WaitlistStatus::Active,
                    priority: *priority,
                    requested_at: *requested_at,
                    notified_at: None,
                    expires_at: None,
                };
                self.waitlist.insert(*id, Arc::new(RwLock::new(entry)));
            }
            Event::WaitlistNotified { id, notified_at, expires_at } => {
                self.replay_waitlist(id, |e| {
                    e.status = WaitlistStatus::Notified;
                    e.notified_at = Some(*notified_at);
                    e.expires_at = Some(*expires_at);
                });
            }
            Event::WaitlistConverted { id } => {
                self.replay_waitlist(id, |e| e.status = WaitlistStatus::Converted);
            }
            Event::WaitlistExpired { id } => {
                self.replay_waitlist(id, |e| e.status = WaitlistStatus::Expired);
            }
            Event::WaitlistCancelled { id } => {
                self.replay_waitlist(id, |e| e.status = WaitlistStatus::Cancelled);
            }
        }
    }

    fn replay_waitlist(&self, id: &Ulid, apply: impl FnOnce(&mut WaitlistEntry)) {
        if let Some(entry) = self.waitlist.get(id) {
            let arc = entry.value().clone();
            let mut guard = arc.try_write().expect("replay: uncontended write");
            apply(&mut guard);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoom> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<SharedReservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn get_waitlist_entry(&self, id: &Ulid) -> Option<SharedWaitlistEntry> {
        self.waitlist.get(id).map(|e| e.value().clone())
    }
}
