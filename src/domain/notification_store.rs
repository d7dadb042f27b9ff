//! Notification Store
//!
//! Persisted record of which token addresses have already been alerted, so a
//! restart does not re-alert inside the same epoch. Records older than the
//! epoch are purged once per poll cycle, making the address eligible again.
//!
//! The file is a single JSON object `{ "<address>": "<RFC 3339 date>" }`,
//! replaced whole on every mutation (write to a temp file, then rename).

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

/// Default state file name
pub const DEFAULT_STATE_FILE: &str = "notified_tokens.json";

/// Default dedup epoch in hours
pub const DEFAULT_EPOCH_HOURS: u64 = 24;

#[derive(Error, Debug, Clone)]
pub enum PersistError {
    #[error("Failed to serialize notification records: {0}")]
    SerializationError(String),

    #[error("Failed to write state file: {0}")]
    WriteError(String),

    #[error("Failed to read state file: {0}")]
    ReadError(String),

    #[error("State file is corrupted: {0}")]
    Corrupt(String),

    #[error("Failed to create directory: {0}")]
    DirectoryError(String),
}

pub type NotificationRecords = BTreeMap<String, DateTime<Utc>>;

/// Outcome of loading the state file
#[derive(Debug, Clone)]
pub enum RecoveryStatus {
    /// No state file, starting empty
    NoState,
    /// Records loaded
    Recovered(usize),
    /// File unreadable or corrupt, starting empty
    Corrupted(String),
}

#[derive(Debug, Default)]
struct StoreState {
    records: NotificationRecords,
    in_flight: HashSet<String>,
}

/// Dedup store shared by all feed loops
#[derive(Debug)]
pub struct NotificationStore {
    /// `None` keeps records in memory only
    path: Option<PathBuf>,
    epoch: Duration,
    state: Mutex<StoreState>,
}

impl NotificationStore {
    /// Open the store at `path`, treating missing or corrupt state as empty
    pub fn open(path: impl Into<PathBuf>, epoch_hours: u64) -> (Self, RecoveryStatus) {
        let path = path.into();
        let (records, status) = match load_records(&path) {
            Ok(None) => (NotificationRecords::new(), RecoveryStatus::NoState),
            Ok(Some(records)) => {
                let count = records.len();
                tracing::info!(count, path = %path.display(), "Notification records loaded");
                (records, RecoveryStatus::Recovered(count))
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Notification state unusable, starting with empty dedup state"
                );
                (NotificationRecords::new(), RecoveryStatus::Corrupted(e.to_string()))
            }
        };

        let store = Self {
            path: Some(path),
            epoch: Duration::hours(epoch_hours as i64),
            state: Mutex::new(StoreState {
                records,
                in_flight: HashSet::new(),
            }),
        };
        (store, status)
    }

    /// Store without persistence
    pub fn in_memory(epoch_hours: u64) -> Self {
        Self {
            path: None,
            epoch: Duration::hours(epoch_hours as i64),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn epoch(&self) -> Duration {
        self.epoch
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn within_epoch(&self, notified_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - notified_at < self.epoch
    }

    /// False iff `address` was notified within the current epoch
    pub async fn should_notify(&self, address: &str, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().await;
        !state
            .records
            .get(address)
            .map_or(false, |at| self.within_epoch(*at, now))
    }

    /// Claim `address` for delivery.
    ///
    /// Returns false if it was notified within the epoch or another feed
    /// holds the claim. A successful claim must end in `mark_notified` or
    /// `release`.
    pub async fn reserve(&self, address: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        let recent = state
            .records
            .get(address)
            .map_or(false, |at| self.within_epoch(*at, now));
        if recent || state.in_flight.contains(address) {
            return false;
        }
        state.in_flight.insert(address.to_string());
        true
    }

    /// Drop a claim after a failed delivery
    pub async fn release(&self, address: &str) {
        self.state.lock().await.in_flight.remove(address);
    }

    /// Record a delivered notification and flush
    pub async fn mark_notified(&self, address: &str, date: DateTime<Utc>) -> Result<(), PersistError> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(address);
        state.records.insert(address.to_string(), date);
        self.flush(&state.records).await
    }

    /// Purge records older than the epoch; returns the number removed
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize, PersistError> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state.records.retain(|_, at| now - *at < self.epoch);
        let removed = before - state.records.len();

        if removed > 0 {
            tracing::info!(removed, remaining = state.records.len(), "Expired notification records purged");
            self.flush(&state.records).await?;
        }
        Ok(removed)
    }

    pub async fn records(&self) -> NotificationRecords {
        self.state.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    /// Write `records` on the blocking pool. Callers hold the state lock
    /// across the await so flushes land in mutation order.
    async fn flush(&self, records: &NotificationRecords) -> Result<(), PersistError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let records = records.clone();
        tokio::task::spawn_blocking(move || save_records(&path, &records))
            .await
            .map_err(|e| PersistError::WriteError(e.to_string()))?
    }
}

/// Read the state file; `Ok(None)` when absent or empty
pub fn load_records(path: &Path) -> Result<Option<NotificationRecords>, PersistError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|e| PersistError::ReadError(e.to_string()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    let records: NotificationRecords =
        serde_json::from_str(&content).map_err(|e| PersistError::Corrupt(e.to_string()))?;
    Ok(Some(records))
}

/// Replace the state file atomically
pub fn save_records(path: &Path, records: &NotificationRecords) -> Result<(), PersistError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistError::DirectoryError(e.to_string()))?;
    }

    let content = serde_json::to_string_pretty(records)
        .map_err(|e| PersistError::SerializationError(e.to_string()))?;

    let tmp = temp_path(path);
    fs::write(&tmp, content).map_err(|e| PersistError::WriteError(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| PersistError::WriteError(e.to_string()))?;

    tracing::debug!(count = records.len(), path = %path.display(), "Notification records flushed");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| DEFAULT_STATE_FILE.into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Default state file path for a data directory
pub fn default_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DEFAULT_STATE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    const ADDR: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    #[tokio::test]
    async fn test_should_notify_after_mark() {
        let store = NotificationStore::in_memory(24);
        let now = Utc::now();

        assert!(store.should_notify(ADDR, now).await);
        store.mark_notified(ADDR, now).await.unwrap();
        assert!(!store.should_notify(ADDR, now).await);
        assert!(!store.should_notify(ADDR, now + Duration::hours(23)).await);
    }

    #[tokio::test]
    async fn test_eligible_again_after_cleanup() {
        let store = NotificationStore::in_memory(24);
        let notified = Utc::now();
        store.mark_notified(ADDR, notified).await.unwrap();

        let later = notified + Duration::hours(25);
        assert_eq!(store.cleanup(later).await.unwrap(), 1);
        assert!(store.should_notify(ADDR, later).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_idempotent() {
        let store = NotificationStore::in_memory(24);
        let now = Utc::now();
        store.mark_notified(ADDR, now - Duration::hours(30)).await.unwrap();
        store.mark_notified("So11111111111111111111111111111111111111112", now).await.unwrap();

        assert_eq!(store.cleanup(now).await.unwrap(), 1);
        let after_first = store.records().await;
        assert_eq!(store.cleanup(now).await.unwrap(), 0);
        assert_eq!(store.records().await, after_first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_marks_all_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join(DEFAULT_STATE_FILE);
        let (store, _) = NotificationStore::open(&path, 24);
        let store = Arc::new(store);
        let now = Utc::now();

        let addresses: Vec<String> = (0..8).map(|i| format!("{}{}", &ADDR[..40], i)).collect();
        let mut handles = Vec::new();
        for address in addresses.clone() {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.mark_notified(&address, now).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let on_disk = load_records(&path).unwrap().unwrap();
        assert_eq!(on_disk.len(), addresses.len());
        assert_eq!(on_disk, store.records().await);
    }

    #[tokio::test]
    async fn test_reserve_blocks_second_claim() {
        let store = NotificationStore::in_memory(24);
        let now = Utc::now();

        assert!(store.reserve(ADDR, now).await);
        assert!(!store.reserve(ADDR, now).await);

        store.release(ADDR).await;
        assert!(store.reserve(ADDR, now).await);

        store.mark_notified(ADDR, now).await.unwrap();
        assert!(!store.reserve(ADDR, now).await);
    }

    #[tokio::test]
    async fn test_concurrent_reserve_single_winner() {
        let store = Arc::new(NotificationStore::in_memory(24));
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.reserve(ADDR, now).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("notified.json");
        let now = Utc::now();

        {
            let (store, status) = NotificationStore::open(&path, 24);
            assert!(matches!(status, RecoveryStatus::NoState));
            store.mark_notified(ADDR, now).await.unwrap();
        }

        let (reopened, status) = NotificationStore::open(&path, 24);
        assert!(matches!(status, RecoveryStatus::Recovered(1)));
        assert!(!reopened.should_notify(ADDR, now).await);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notified.json");
        fs::write(&path, "{ not json").unwrap();

        let (store, status) = NotificationStore::open(&path, 24);
        assert!(matches!(status, RecoveryStatus::Corrupted(_)));
        assert!(store.is_empty().await);

        // Next flush replaces the corrupt document
        store.mark_notified(ADDR, Utc::now()).await.unwrap();
        assert!(load_records(&path).unwrap().unwrap().contains_key(ADDR));
    }

    #[tokio::test]
    async fn test_empty_file_treated_as_no_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notified.json");
        fs::write(&path, "  \n").unwrap();

        let (_, status) = NotificationStore::open(&path, 24);
        assert!(matches!(status, RecoveryStatus::NoState));
    }

    #[test]
    fn test_file_format_is_address_to_iso_date() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notified.json");
        let date = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut records = NotificationRecords::new();
        records.insert(ADDR.to_string(), date);
        save_records(&path, &records).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[ADDR], "2026-01-02T03:04:05Z");
    }

    #[test]
    fn test_default_path() {
        let path = default_path(Path::new("/tmp/data"));
        assert_eq!(path, Path::new("/tmp/data/notified_tokens.json"));
    }
}
