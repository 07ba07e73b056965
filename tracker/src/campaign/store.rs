//! Durable, concurrency-safe campaign log.
//!
//! Every operation runs under one async mutex, and every mutation persists a
//! full snapshot before the lock is released, so the file on disk always
//! matches some prefix of the linear order of completed mutations.
//!
//! Snapshots are written to a sibling temp file, synced, then renamed over the
//! target. A crash leaves either the old or the new snapshot, never a mix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{SubsecRound, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::entry::{CampaignEntry, FlagUpdate, NewEntry};
use super::error::StorageError;

/// What `CampaignLog::open` found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// No history file existed; an empty one was written
    Created,
    /// The history file was read successfully. Entries sharing an id were
    /// folded into the first one; `merged_duplicates` counts how many.
    Loaded {
        entries: usize,
        merged_duplicates: usize,
    },
    /// The history file could not be read or parsed. It was moved aside and an
    /// empty log was started in its place.
    Recovered { quarantined: PathBuf, reason: String },
}

#[derive(Default)]
struct State {
    entries: Vec<CampaignEntry>,
    index: HashMap<Uuid, usize>,
}

impl State {
    /// Build the state from loaded entries, keeping ids unique.
    ///
    /// A later entry with an already seen id is dropped after its flags are
    /// raised on the first occurrence. Returns the number of entries dropped.
    fn from_entries(loaded: Vec<CampaignEntry>) -> (Self, usize) {
        let mut state = Self {
            entries: Vec::with_capacity(loaded.len()),
            index: HashMap::with_capacity(loaded.len()),
        };
        let mut merged = 0;

        for entry in loaded {
            match state.index.get(&entry.id) {
                Some(&position) => {
                    error!(
                        id = %entry.id,
                        kept_recipient = %state.entries[position].recipient,
                        dropped_recipient = %entry.recipient,
                        "campaign_log_duplicate_id_merged"
                    );
                    state.entries[position].apply(FlagUpdate {
                        read: Some(entry.read),
                        replied: Some(entry.replied),
                    });
                    merged += 1;
                }
                None => state.push(entry),
            }
        }

        (state, merged)
    }

    fn push(&mut self, entry: CampaignEntry) {
        self.index.insert(entry.id, self.entries.len());
        self.entries.push(entry);
    }

    fn pop(&mut self) {
        if let Some(entry) = self.entries.pop() {
            self.index.remove(&entry.id);
        }
    }
}

/// The single owner of the campaign history file.
pub struct CampaignLog {
    path: PathBuf,
    state: Mutex<State>,
    load_state: LoadState,
}

impl CampaignLog {
    /// Open the log at `path`, creating an empty one if the file is absent.
    ///
    /// A file that exists but cannot be read or parsed is renamed to
    /// `<name>.corrupt-<unix-seconds>` and replaced by an empty snapshot; see
    /// [`CampaignLog::load_state`]. An error is returned only when neither the
    /// quarantine nor the fresh snapshot can be written.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        let (state, load_state) = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<CampaignEntry>>(&bytes) {
                Ok(loaded) => {
                    let (state, merged_duplicates) = State::from_entries(loaded);

                    // Rewrite so the file holds each id once
                    if merged_duplicates > 0 {
                        persist(&path, &state.entries).await?;
                    }

                    info!(
                        path = %path.display(),
                        entries = state.entries.len(),
                        merged_duplicates = merged_duplicates,
                        "campaign_log_loaded"
                    );
                    let entries = state.entries.len();
                    (
                        state,
                        LoadState::Loaded {
                            entries,
                            merged_duplicates,
                        },
                    )
                }
                Err(e) => (State::default(), quarantine(&path, e.to_string()).await?),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                persist(&path, &[]).await?;
                info!(path = %path.display(), "campaign_log_absent_initialized");
                (State::default(), LoadState::Created)
            }
            Err(e) => (State::default(), quarantine(&path, e.to_string()).await?),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
            load_state,
        })
    }

    /// Location of the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How the log was initialised.
    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    /// Record a send attempt and persist it before returning.
    ///
    /// The entry is stamped with the current time at microsecond precision,
    /// which is what the file stores. If the snapshot cannot be written the
    /// entry is removed again and the error returned, so memory and disk never
    /// disagree about which entries exist.
    pub async fn append(&self, new: NewEntry) -> Result<CampaignEntry, StorageError> {
        let mut state = self.state.lock().await;

        if state.index.contains_key(&new.id) {
            return Err(StorageError::DuplicateId(new.id));
        }

        let entry = new.into_entry(Utc::now().trunc_subsecs(6));
        state.push(entry.clone());

        if let Err(e) = persist(&self.path, &state.entries).await {
            state.pop();
            error!(id = %entry.id, error = %e, "campaign_log_persist_failed");
            return Err(e);
        }

        info!(
            id = %entry.id,
            recipient = %entry.recipient,
            status = entry.status.as_str(),
            path = %self.path.display(),
            "campaign_entry_appended"
        );

        Ok(entry)
    }

    /// Point-in-time copy of all entries in insertion order.
    pub async fn query(&self) -> Vec<CampaignEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Copy of a single entry.
    pub async fn get(&self, id: Uuid) -> Option<CampaignEntry> {
        let state = self.state.lock().await;
        state.index.get(&id).map(|&position| state.entries[position].clone())
    }

    /// Raise flags on the entry with `id`.
    ///
    /// Returns `Ok(false)` when no such entry exists. Flags already set are
    /// left alone and nothing is written. If persisting fails the flag stays
    /// raised in memory and reaches disk with the next successful write.
    pub async fn update_flags(&self, id: Uuid, update: FlagUpdate) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;

        let Some(&position) = state.index.get(&id) else {
            return Ok(false);
        };

        if !state.entries[position].apply(update) {
            return Ok(true);
        }

        if let Err(e) = persist(&self.path, &state.entries).await {
            error!(id = %id, error = %e, "campaign_log_persist_failed");
            return Err(e);
        }

        let entry = &state.entries[position];
        info!(
            id = %id,
            read = entry.read,
            replied = entry.replied,
            "campaign_entry_flags_updated"
        );

        Ok(true)
    }
}

/// Move an unreadable history file aside and start from an empty snapshot.
async fn quarantine(path: &Path, reason: String) -> Result<LoadState, StorageError> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "history.json".into());
    name.push(format!(".corrupt-{}", Utc::now().timestamp()));
    let quarantined = path.with_file_name(name);

    fs::rename(path, &quarantined)
        .await
        .map_err(|e| StorageError::io(path, e))?;

    error!(
        path = %path.display(),
        quarantined = %quarantined.display(),
        reason = %reason,
        "campaign_log_corrupt_quarantined"
    );

    persist(path, &[]).await?;

    Ok(LoadState::Recovered {
        quarantined,
        reason,
    })
}

/// Atomically replace the history file with `entries`.
async fn persist(path: &Path, entries: &[CampaignEntry]) -> Result<(), StorageError> {
    let payload = serde_json::to_vec_pretty(entries)?;
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    if let Err(e) = write_synced(&temp_path, &payload).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::io(&temp_path, e));
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::io(path, e));
    }

    sync_parent(path).await;

    Ok(())
}

async fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(payload).await?;
    file.sync_all().await
}

/// Make the rename itself durable.
#[cfg(unix)]
async fn sync_parent(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let result = match fs::File::open(parent).await {
        Ok(dir) => dir.sync_all().await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!(dir = %parent.display(), error = %e, "campaign_log_dir_sync_failed");
    }
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::campaign::SendStatus;

    fn history_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("history.json")
    }

    #[tokio::test]
    async fn test_open_absent_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);

        let log = CampaignLog::open(&path).await.unwrap();

        assert_eq!(log.load_state(), &LoadState::Created);
        assert!(log.query().await.is_empty());
        let on_disk: Vec<CampaignEntry> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(on_disk.is_empty());
    }

    #[tokio::test]
    async fn test_append_persists_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let log = CampaignLog::open(&path).await.unwrap();

        let entry = log
            .append(NewEntry::new("a@b.com", "Jean", SendStatus::Sent))
            .await
            .unwrap();

        let reopened = CampaignLog::open(&path).await.unwrap();
        assert_eq!(reopened.load_state(), &LoadState::Loaded {
                entries: 1,
                merged_duplicates: 0
            });
        assert_eq!(reopened.query().await, vec![entry]);
    }

    #[tokio::test]
    async fn test_sent_at_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let log = CampaignLog::open(&path).await.unwrap();

        let mut appended = Vec::new();
        for i in 0..5 {
            appended.push(
                log.append(NewEntry::new(format!("u{i}@b.com"), "", SendStatus::Sent))
                    .await
                    .unwrap(),
            );
        }

        let reloaded = CampaignLog::open(&path).await.unwrap().query().await;
        assert_eq!(reloaded, appended);
        for (before, after) in appended.iter().zip(&reloaded) {
            assert_eq!(before.sent_at, after.sent_at);
        }
    }

    #[tokio::test]
    async fn test_append_rolls_back_when_persist_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let log = CampaignLog::open(&path).await.unwrap();
        let kept = log
            .append(NewEntry::new("a@b.com", "", SendStatus::Sent))
            .await
            .unwrap();

        // A directory in place of the file makes the rename fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = log
            .append(NewEntry::new("c@d.com", "", SendStatus::Sent))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
        assert_eq!(log.query().await, vec![kept.clone()]);

        std::fs::remove_dir(&path).unwrap();
        let next = log
            .append(NewEntry::new("e@f.com", "", SendStatus::Sent))
            .await
            .unwrap();

        let reloaded = CampaignLog::open(&path).await.unwrap().query().await;
        assert_eq!(reloaded, vec![kept, next]);
    }

    #[tokio::test]
    async fn test_flag_kept_in_memory_when_persist_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let log = CampaignLog::open(&path).await.unwrap();
        let entry = log
            .append(NewEntry::new("a@b.com", "", SendStatus::Sent))
            .await
            .unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(log.update_flags(entry.id, FlagUpdate::read()).await.is_err());
        assert!(log.get(entry.id).await.unwrap().read);

        // The next successful write carries the flag
        std::fs::remove_dir(&path).unwrap();
        log.append(NewEntry::new("c@d.com", "", SendStatus::Sent))
            .await
            .unwrap();
        let reopened = CampaignLog::open(&path).await.unwrap();
        assert!(reopened.get(entry.id).await.unwrap().read);
    }

    #[tokio::test]
    async fn test_duplicate_ids_on_load_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let dup = Uuid::new_v4();
        let other = Uuid::new_v4();
        let file = serde_json::json!([
            {"date": "2024-03-01T09:00:00Z", "email": "first@b.com", "variable": "",
             "uuid": dup, "status": "Sent", "read": false, "replied": false},
            {"date": "2024-03-01T09:05:00Z", "email": "other@b.com", "variable": "",
             "uuid": other, "status": "Sent", "read": false, "replied": false},
            {"date": "2024-03-01T09:10:00Z", "email": "second@b.com", "variable": "",
             "uuid": dup, "status": "Sent", "read": true, "replied": false},
        ]);
        std::fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();

        let log = CampaignLog::open(&path).await.unwrap();

        assert_eq!(
            log.load_state(),
            &LoadState::Loaded {
                entries: 2,
                merged_duplicates: 1
            }
        );
        let ids: Vec<_> = log.query().await.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![dup, other]);

        let merged = log.get(dup).await.unwrap();
        assert_eq!(merged.recipient, "first@b.com");
        assert!(merged.read);

        let on_disk: Vec<CampaignEntry> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, log.query().await);
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let log = CampaignLog::open(history_path(&dir)).await.unwrap();

        let first = NewEntry::new("a@b.com", "", SendStatus::Sent);
        let id = first.id;
        log.append(first).await.unwrap();

        let err = log
            .append(NewEntry::with_id(id, "c@d.com", "", SendStatus::Sent))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId(dup) if dup == id));
        assert_eq!(log.query().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let log = Arc::new(CampaignLog::open(&path).await.unwrap());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    log.append(NewEntry::new(
                        format!("user{i}@example.com"),
                        "",
                        SendStatus::Sent,
                    ))
                    .await
                    .unwrap()
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        let entries = CampaignLog::open(&path).await.unwrap().query().await;
        assert_eq!(entries.len(), 32);
        let ids: std::collections::HashSet<_> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 32);
    }

    #[tokio::test]
    async fn test_query_is_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let log = CampaignLog::open(history_path(&dir)).await.unwrap();
        let entry = log
            .append(NewEntry::new("a@b.com", "", SendStatus::Sent))
            .await
            .unwrap();

        let snapshot = log.query().await;
        log.update_flags(entry.id, FlagUpdate::read()).await.unwrap();
        log.append(NewEntry::new("c@d.com", "", SendStatus::Failed))
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].read);
    }

    #[tokio::test]
    async fn test_update_flags_is_idempotent_and_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let log = CampaignLog::open(&path).await.unwrap();
        let entry = log
            .append(NewEntry::new("a@b.com", "", SendStatus::Sent))
            .await
            .unwrap();

        assert!(log.update_flags(entry.id, FlagUpdate::read()).await.unwrap());
        let once = log.query().await;
        assert!(log.update_flags(entry.id, FlagUpdate::read()).await.unwrap());
        assert_eq!(log.query().await, once);

        let clear = FlagUpdate {
            read: Some(false),
            replied: None,
        };
        assert!(log.update_flags(entry.id, clear).await.unwrap());
        assert!(log.get(entry.id).await.unwrap().read);

        let reopened = CampaignLog::open(&path).await.unwrap();
        assert!(reopened.get(entry.id).await.unwrap().read);
    }

    #[tokio::test]
    async fn test_update_flags_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let log = CampaignLog::open(&path).await.unwrap();
        log.append(NewEntry::new("a@b.com", "", SendStatus::Sent))
            .await
            .unwrap();

        let before = std::fs::read(&path).unwrap();
        let found = log
            .update_flags(Uuid::new_v4(), FlagUpdate::read())
            .await
            .unwrap();

        assert!(!found);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        std::fs::write(&path, b"[{\"email\": \"half written").unwrap();

        let log = CampaignLog::open(&path).await.unwrap();

        let quarantined = match log.load_state() {
            LoadState::Recovered { quarantined, .. } => quarantined.clone(),
            other => panic!("expected recovery, got {other:?}"),
        };
        assert!(log.query().await.is_empty());
        assert_eq!(
            std::fs::read(&quarantined).unwrap(),
            b"[{\"email\": \"half written"
        );

        // The fresh snapshot is usable
        log.append(NewEntry::new("a@b.com", "", SendStatus::Sent))
            .await
            .unwrap();
        assert_eq!(CampaignLog::open(&path).await.unwrap().query().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let log = CampaignLog::open(history_path(&dir)).await.unwrap();
        for _ in 0..3 {
            log.append(NewEntry::new("a@b.com", "", SendStatus::Sent))
                .await
                .unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("history.json")]);
    }
}
