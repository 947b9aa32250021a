use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tokio_test::assert_ok;
use ulid::Ulid;

use innkeep::limits::WAITLIST_HOLD_MS;
use innkeep::model::*;
use innkeep::property::PropertyManager;

// ── Test infrastructure ──────────────────────────────────────

fn test_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Wait for the next event on a subscription with timeout.
async fn recv_event(rx: &mut broadcast::Receiver<Event>, timeout: Duration) -> Option<Event> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().and_then(Result::ok)
}

#[tokio::test]
async fn guest_books_stays_and_checks_out() {
    let pm = PropertyManager::new(test_data_dir(), 10_000);
    let engine = pm.get_or_create("grand-hotel").unwrap();

    let branch = Ulid::new();
    let room_type = Ulid::new();
    let room_id = Ulid::new();
    engine
        .create_room(room_id, branch, room_type, Some(3), "301".into(), 150_00)
        .await
        .unwrap();

    // Front desk watches the room
    let mut room_events = engine.notify.subscribe(room_id);

    let guest = Ulid::new();
    let res_id = Ulid::new();
    let range = DateRange::new(d(2025, 9, 1), d(2025, 9, 4));
    tokio_test::assert_ok!(
        engine
            .create_reservation(res_id, guest, range, &[room_id], &[], 1_000)
            .await
    );

    engine
        .transition_reservation(res_id, ReservationStatus::Confirmed, d(2025, 8, 20), 2_000)
        .await
        .unwrap();
    engine
        .transition_reservation(res_id, ReservationStatus::CheckedIn, d(2025, 9, 1), 3_000)
        .await
        .unwrap();

    let occupied = recv_event(&mut room_events, Duration::from_secs(2)).await.unwrap();
    assert_eq!(occupied, Event::RoomStatusChanged { id: room_id, status: RoomStatus::Occupied });

    engine
        .transition_reservation(res_id, ReservationStatus::CheckedOut, d(2025, 9, 4), 4_000)
        .await
        .unwrap();

    let dirty = recv_event(&mut room_events, Duration::from_secs(2)).await.unwrap();
    assert_eq!(dirty, Event::RoomStatusChanged { id: room_id, status: RoomStatus::Dirty });

    // Housekeeping completes the cycle and the room is sellable again
    engine.set_room_status(room_id, RoomStatus::Available).await.unwrap();
    let rooms = engine.available_rooms_by_type(branch, room_type, &range).await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room_id);
}

#[tokio::test]
async fn waitlisted_guest_gets_the_cancelled_dates() {
    let pm = PropertyManager::new(test_data_dir(), 10_000);
    let engine = pm.get_or_create("seaview").unwrap();

    let branch = Ulid::new();
    let room_type = Ulid::new();
    let room_id = Ulid::new();
    engine
        .create_room(room_id, branch, room_type, None, "12".into(), 95_00)
        .await
        .unwrap();

    let range = DateRange::new(d(2025, 12, 24), d(2025, 12, 27));
    let first_guest = Ulid::new();
    let res_id = Ulid::new();
    engine
        .create_reservation(res_id, first_guest, range, &[room_id], &[], 1_000)
        .await
        .unwrap();

    // A second guest queues for the sold-out dates and listens for the offer
    let hopeful = Ulid::new();
    let entry_id = Ulid::new();
    engine
        .join_waitlist(entry_id, hopeful, room_type, branch, range, 0, 2_000)
        .await
        .unwrap();
    let mut entry_events = engine.notify.subscribe(entry_id);

    let outcome = engine
        .transition_reservation(res_id, ReservationStatus::Cancelled, d(2025, 12, 1), 10_000)
        .await
        .unwrap();
    assert_eq!(outcome.waitlist_notified, vec![entry_id]);

    let offer = recv_event(&mut entry_events, Duration::from_secs(2)).await.unwrap();
    assert_eq!(
        offer,
        Event::WaitlistNotified {
            id: entry_id,
            notified_at: 10_000,
            expires_at: 10_000 + WAITLIST_HOLD_MS,
        }
    );

    // The guest converts inside the window and books the freed room
    engine.convert_waitlist(entry_id, 20_000).await.unwrap();
    engine
        .create_reservation(Ulid::new(), hopeful, range, &[room_id], &[], 30_000)
        .await
        .unwrap();
}

#[tokio::test]
async fn property_state_survives_reopen() {
    let dir = test_data_dir();
    let branch = Ulid::new();
    let room_type = Ulid::new();
    let room_id = Ulid::new();
    let res_id = Ulid::new();
    let range = DateRange::new(d(2025, 10, 1), d(2025, 10, 5));

    {
        let pm = PropertyManager::new(dir.clone(), 10_000);
        let engine = pm.get_or_create("lakeside").unwrap();
        engine
            .create_room(room_id, branch, room_type, Some(1), "104".into(), 110_00)
            .await
            .unwrap();
        engine
            .create_reservation(res_id, Ulid::new(), range, &[room_id], &[], 1_000)
            .await
            .unwrap();
        engine
            .transition_reservation(res_id, ReservationStatus::Confirmed, d(2025, 9, 1), 2_000)
            .await
            .unwrap();
    }

    // Fresh manager over the same data dir replays the property's WAL
    let pm = PropertyManager::new(dir, 10_000);
    let engine = pm.get_or_create("lakeside").unwrap();

    let res = engine.reservation_info(&res_id).await.unwrap();
    assert_eq!(res.status, ReservationStatus::Confirmed);
    assert_eq!(res.total_cents, 4 * 110_00);
    assert!(!engine.check_availability(&room_id, &range).await.unwrap());
}
