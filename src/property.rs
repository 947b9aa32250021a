use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::EventHub;
use crate::reaper;

/// Manages per-property engines. Each property gets its own Engine + WAL,
/// plus a waitlist sweep and a WAL compactor.
pub struct PropertyManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl PropertyManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given property.
    pub fn get_or_create(&self, property: &str) -> std::io::Result<Arc<Engine>> {
        if property.len() > MAX_PROPERTY_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "property name too long",
            ));
        }

        // Sanitize property name to prevent path traversal. The cache is
        // keyed by the sanitized name too: names that collapse to the same
        // WAL file must share one engine.
        let safe_name: String = property
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty property name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_PROPERTIES {
            return Err(std::io::Error::other("too many properties"));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(EventHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        // Spawn waitlist sweep + compactor for this property
        let sweep_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_waitlist_sweep(sweep_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(safe_name, engine.clone());
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_property").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn property_isolation() {
        let dir = test_data_dir("isolation");
        let pm = PropertyManager::new(dir, 1000);

        let eng_a = pm.get_or_create("seaside").unwrap();
        let eng_b = pm.get_or_create("alpine").unwrap();

        let room_id = Ulid::new();
        let branch = Ulid::new();
        let room_type = Ulid::new();

        // Same room id in both properties
        eng_a
            .create_room(room_id, branch, room_type, Some(1), "101".into(), 100_00)
            .await
            .unwrap();
        eng_b
            .create_room(room_id, branch, room_type, Some(1), "101".into(), 100_00)
            .await
            .unwrap();

        let range = DateRange::new(d(2025, 6, 1), d(2025, 6, 4));
        eng_a
            .create_reservation(Ulid::new(), Ulid::new(), range, &[room_id], &[], 1_000)
            .await
            .unwrap();

        // The booking in A must not shadow B's calendar
        assert!(!eng_a.check_availability(&room_id, &range).await.unwrap());
        assert!(eng_b.check_availability(&room_id, &range).await.unwrap());
    }

    #[tokio::test]
    async fn property_lazy_creation() {
        let dir = test_data_dir("lazy");
        let pm = PropertyManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = pm.get_or_create("harbor").unwrap();
        assert!(dir.join("harbor.wal").exists());
    }

    #[tokio::test]
    async fn property_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let pm = PropertyManager::new(dir, 1000);

        let eng1 = pm.get_or_create("foo").unwrap();
        let eng2 = pm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn property_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let pm = PropertyManager::new(dir.clone(), 1000);

        // Path traversal attempt
        let _eng = pm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        assert!(pm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn aliased_names_share_one_engine() {
        let dir = test_data_dir("alias");
        let pm = PropertyManager::new(dir.clone(), 1000);

        // Both collapse to "grandhotel" after sanitization; two live
        // engines over one WAL file would interleave frames.
        let eng1 = pm.get_or_create("grand.hotel").unwrap();
        let eng2 = pm.get_or_create("grandhotel").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));

        let wals: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(wals.len(), 1);
    }

    #[tokio::test]
    async fn property_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let pm = PropertyManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_PROPERTY_NAME_LEN + 1);
        let result = pm.get_or_create(&long_name);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("property name too long"));
    }

    #[tokio::test]
    async fn property_count_limit() {
        let dir = test_data_dir("count_limit");
        let pm = PropertyManager::new(dir, 1000);

        for i in 0..MAX_PROPERTIES {
            pm.get_or_create(&format!("p{i}")).unwrap();
        }
        let result = pm.get_or_create("one_more");
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("too many properties"));
    }
}
