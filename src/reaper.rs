use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, now_ms};

/// Background task that expires waitlist entries whose 24h hold window
/// lapsed without a conversion.
pub async fn run_waitlist_sweep(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = now_ms();
        for entry_id in engine.collect_expired_waitlist(now) {
            match engine.expire_waitlist_entry(entry_id, now).await {
                Ok(true) => info!("expired waitlist entry {entry_id}"),
                // Raced with a conversion or cancellation — already handled
                Ok(false) => debug!("sweep skip {entry_id}: no longer due"),
                Err(e) => warn!("sweep failed for {entry_id}: {e}"),
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::WAITLIST_HOLD_MS;
    use crate::model::*;
    use crate::notify::EventHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn sweep_collects_lapsed_holds() {
        let path = test_wal_path("sweep_collect.wal");
        let notify = Arc::new(EventHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let branch = Ulid::new();
        let room_type = Ulid::new();
        let room_id = Ulid::new();
        engine
            .create_room(room_id, branch, room_type, Some(1), "101".into(), 100_00)
            .await
            .unwrap();

        let range = DateRange::new(d(2025, 7, 1), d(2025, 7, 4));
        let res_id = Ulid::new();
        engine
            .create_reservation(res_id, Ulid::new(), range, &[room_id], &[], 1_000)
            .await
            .unwrap();

        let entry_id = Ulid::new();
        engine
            .join_waitlist(entry_id, Ulid::new(), room_type, branch, range, 0, 2_000)
            .await
            .unwrap();

        // Cancellation frees the dates and notifies the entry at t=10_000
        engine
            .transition_reservation(res_id, ReservationStatus::Cancelled, d(2025, 6, 1), 10_000)
            .await
            .unwrap();

        // Inside the hold window: nothing to expire
        assert!(engine.collect_expired_waitlist(10_000 + 1).is_empty());

        // Past the window: due for expiry
        let after = 10_000 + WAITLIST_HOLD_MS;
        let expired = engine.collect_expired_waitlist(after);
        assert_eq!(expired, vec![entry_id]);

        assert!(engine.expire_waitlist_entry(entry_id, after).await.unwrap());

        // Second pass finds nothing — the entry is terminal now
        assert!(engine.collect_expired_waitlist(after).is_empty());
        assert!(!engine.expire_waitlist_entry(entry_id, after).await.unwrap());
    }

    #[tokio::test]
    async fn expire_loses_race_against_convert() {
        let path = test_wal_path("sweep_race.wal");
        let notify = Arc::new(EventHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let branch = Ulid::new();
        let room_type = Ulid::new();
        let room_id = Ulid::new();
        engine
            .create_room(room_id, branch, room_type, None, "201".into(), 90_00)
            .await
            .unwrap();

        let range = DateRange::new(d(2025, 8, 10), d(2025, 8, 12));
        let res_id = Ulid::new();
        engine
            .create_reservation(res_id, Ulid::new(), range, &[room_id], &[], 1_000)
            .await
            .unwrap();

        let entry_id = Ulid::new();
        engine
            .join_waitlist(entry_id, Ulid::new(), room_type, branch, range, 0, 2_000)
            .await
            .unwrap();
        engine
            .transition_reservation(res_id, ReservationStatus::Cancelled, d(2025, 8, 1), 5_000)
            .await
            .unwrap();

        // Guest converts just inside the window
        engine.convert_waitlist(entry_id, 5_000 + 60_000).await.unwrap();

        // The sweep arriving late must not clobber the conversion
        let late = 5_000 + WAITLIST_HOLD_MS + 1;
        assert!(!engine.expire_waitlist_entry(entry_id, late).await.unwrap());
        let info = engine.waitlist_info(&entry_id).await.unwrap();
        assert_eq!(info.status, WaitlistStatus::Converted);
    }
}
