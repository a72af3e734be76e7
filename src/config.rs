use std::path::PathBuf;

/// Store configuration. Defaults match a single-node deployment writing
/// under `./data`; every field can be overridden from the environment.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the booking WAL file.
    pub wal_path: PathBuf,
    /// Snapshot the WAL once this many appends have accumulated.
    pub snapshot_threshold: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wal_path: PathBuf::from("./data/bookings.wal"),
            snapshot_threshold: 1000,
        }
    }
}

impl StoreConfig {
    /// Read overrides from `ROOMLOCK_DATA_DIR` and
    /// `ROOMLOCK_SNAPSHOT_THRESHOLD`.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROOMLOCK_DATA_DIR").unwrap_or_else(|_| "./data".into());
        let snapshot_threshold = std::env::var("ROOMLOCK_SNAPSHOT_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);
        Self {
            wal_path: PathBuf::from(data_dir).join("bookings.wal"),
            snapshot_threshold,
        }
    }
}
