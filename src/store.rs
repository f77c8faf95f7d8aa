// List store: local cache kept in sync with a remote mirror

use crate::cache::{LocalCache, SqliteCache};
use crate::entry::{self, Entry, EntryPatch, ListName, NewEntry};
use crate::filter::{self, Filter};
use crate::mirror::{RemoteMirror, SnapshotHandler, SubscriptionId};
use chrono::{DateTime, Utc};
use eyre::{Context, Result, eyre};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CURRENT_VERSION: u32 = 1;
const DB_FILE: &str = "clarity.db";

/// Result of offering a remote snapshot to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteUpdate {
    /// Identical to the cached value; nothing written
    Unchanged,
    /// Cached value replaced and change listeners notified
    Applied,
    /// Payload did not parse or could not be stored; local data kept
    Rejected,
}

/// Sync counters for one list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub pushes: u64,
    pub failed_pushes: u64,
    /// Writes that came from the mirror and were not pushed back
    pub suppressed_pushes: u64,
    pub remote_applied: u64,
    pub remote_rejected: u64,
    pub last_remote_at: Option<DateTime<Utc>>,
}

/// Synchronization state for one list of one store
#[derive(Debug, Default)]
struct SyncContext {
    /// Set while a remote snapshot is being written to the cache
    applying_remote: bool,
    /// The mirror has delivered at least one snapshot for this list
    remote_seen: bool,
    status: SyncStatus,
}

struct State {
    cache: Box<dyn LocalCache>,
    contexts: HashMap<ListName, SyncContext>,
    listeners: Vec<Sender<ListName>>,
}

impl State {
    fn context(&mut self, list: ListName) -> &mut SyncContext {
        self.contexts.entry(list).or_default()
    }

    /// Write one list to the cache and return the payload to push, if any
    ///
    /// Every cache write goes through here. Writes made while the list is
    /// marked as applying a remote snapshot are never pushed.
    fn commit(
        &mut self,
        list: ListName,
        write: impl FnOnce(&mut dyn LocalCache) -> Result<String>,
    ) -> Result<Option<String>> {
        let payload = write(&mut *self.cache)?;

        let ctx = self.context(list);
        if ctx.applying_remote {
            ctx.status.suppressed_pushes += 1;
            debug!(list = %list, "Remote update written locally, push suppressed");
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn broadcast(&mut self, list: ListName) {
        self.listeners.retain(|tx| tx.send(list).is_ok());
    }
}

struct Attachment {
    mirror: Arc<dyn RemoteMirror>,
    subscriptions: Vec<(ListName, SubscriptionId)>,
}

struct Inner {
    base_path: Option<PathBuf>,
    state: Mutex<State>,
    /// Serializes local read-modify-write cycles and their pushes
    writer: Mutex<()>,
    mirror: Mutex<Option<Attachment>>,
}

/// Named lists persisted locally and mirrored remotely
///
/// Cloning is cheap; all clones share the same cache and mirror.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open or create a store in `path`
    ///
    /// The directory holds the SQLite cache and a `.version` marker.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();

        // Create directory if it doesn't exist
        fs::create_dir_all(&base_path).context("Failed to create store directory")?;

        let cache = SqliteCache::open(base_path.join(DB_FILE))?;
        let store = Self::build(cache, Some(base_path));
        store.write_version()?;

        info!(path = ?store.base_path(), "Opened store");
        Ok(store)
    }

    /// Store over an arbitrary cache
    pub fn new(cache: impl LocalCache + 'static) -> Self {
        Self::build(cache, None)
    }

    /// Store backed by an in-memory SQLite cache
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(SqliteCache::open_in_memory()?))
    }

    fn build(cache: impl LocalCache + 'static, base_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_path,
                state: Mutex::new(State {
                    cache: Box::new(cache),
                    contexts: HashMap::new(),
                    listeners: Vec::new(),
                }),
                writer: Mutex::new(()),
                mirror: Mutex::new(None),
            }),
        }
    }

    /// Directory of an on-disk store
    pub fn base_path(&self) -> Option<&Path> {
        self.inner.base_path.as_deref()
    }

    fn write_version(&self) -> Result<()> {
        if let Some(base) = self.base_path() {
            let version_path = base.join(".version");
            if !version_path.exists() {
                fs::write(version_path, CURRENT_VERSION.to_string())?;
            }
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>> {
        self.inner
            .state
            .lock()
            .map_err(|_| eyre!("Store state lock poisoned"))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every entry of a list, archived ones included, in stored order
    pub fn entries(&self, list: ListName) -> Result<Vec<Entry>> {
        Ok(self.lock_state()?.cache.get(list))
    }

    /// Entries passing every filter, in stored order
    pub fn list(&self, list: ListName, filters: &[Filter]) -> Result<Vec<Entry>> {
        let mut entries = self.entries(list)?;
        entries.retain(|entry| filter::matches_all(entry, filters));
        Ok(entries)
    }

    /// Entries that are not archived
    pub fn active_entries(&self, list: ListName) -> Result<Vec<Entry>> {
        self.list(list, &[Filter::active()])
    }

    pub fn get_entry(&self, list: ListName, id: &str) -> Result<Option<Entry>> {
        Ok(self.entries(list)?.into_iter().find(|entry| entry.id == id))
    }

    /// Raw cached payload for a list
    pub fn snapshot(&self, list: ListName) -> Result<Option<String>> {
        self.lock_state()?.cache.read(list.storage_key())
    }

    // ========================================================================
    // List operations
    // ========================================================================

    /// Append a new entry with a fresh id and creation time
    pub fn add_entry(&self, list: ListName, new: NewEntry) -> Result<Entry> {
        let mut new = new;
        new.text = new.text.trim().to_string();
        if new.text.is_empty() {
            return Err(eyre!("Entry text cannot be empty"));
        }

        let added = self.mutate(list, move |entries| {
            let id = unique_id(entries);
            let entry = new.into_entry(id, Utc::now());
            entries.push(entry.clone());
            Some(entry)
        })?;

        let entry = added.ok_or_else(|| eyre!("Entry was not added to {}", list))?;
        debug!(list = %list, id = %entry.id, "Added entry");
        Ok(entry)
    }

    /// Merge `patch` into the entry with `id`. Returns `None`, without
    /// writing anything, when no such entry exists.
    pub fn update_entry(&self, list: ListName, id: &str, patch: EntryPatch) -> Result<Option<Entry>> {
        let updated = self.mutate(list, |entries| {
            let entry = entries.iter_mut().find(|entry| entry.id == id)?;
            patch.apply(entry, Utc::now());
            Some(entry.clone())
        })?;

        if updated.is_none() {
            debug!(list = %list, id, "Update for unknown entry ignored");
        }
        Ok(updated)
    }

    pub fn set_completed(&self, list: ListName, id: &str, completed: bool) -> Result<Option<Entry>> {
        self.update_entry(list, id, EntryPatch::completed(completed))
    }

    /// Flip the completion flag
    pub fn toggle_entry(&self, list: ListName, id: &str) -> Result<Option<Entry>> {
        self.mutate(list, |entries| {
            let entry = entries.iter_mut().find(|entry| entry.id == id)?;
            EntryPatch::completed(!entry.completed).apply(entry, Utc::now());
            Some(entry.clone())
        })
    }

    /// Soft delete: the entry stays in storage with `archived` set
    pub fn archive_entry(&self, list: ListName, id: &str) -> Result<Option<Entry>> {
        self.update_entry(list, id, EntryPatch::archived())
    }

    /// Put entries in the order given by `order`. Entries not mentioned
    /// follow in their previous relative order; unknown ids are ignored.
    pub fn reorder_entries<S: AsRef<str>>(&self, list: ListName, order: &[S]) -> Result<()> {
        self.mutate(list, |entries| {
            let current = std::mem::take(entries);
            *entries = reorder(current, order);
            Some(())
        })?;
        Ok(())
    }

    /// Read-modify-write of one list. `f` returning `None` means no change:
    /// nothing is written or pushed.
    fn mutate<T>(&self, list: ListName, f: impl FnOnce(&mut Vec<Entry>) -> Option<T>) -> Result<Option<T>> {
        let _writer = self
            .inner
            .writer
            .lock()
            .map_err(|_| eyre!("Store writer lock poisoned"))?;

        let (result, outbound) = {
            let mut state = self.lock_state()?;
            let mut entries = state.cache.get(list);

            let Some(result) = f(&mut entries) else {
                return Ok(None);
            };

            let outbound = state
                .commit(list, |cache| cache.put(list, &entries))
                .with_context(|| format!("Failed to save {} list", list))?;
            (result, outbound)
        };

        // Pushed outside the state lock: the mirror may deliver our own echo
        // synchronously, which takes the lock again
        if let Some(payload) = outbound {
            self.push(list, &payload);
        }

        Ok(Some(result))
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Mirror every list to `mirror` and follow its changes
    ///
    /// Snapshots already present remotely replace local data. Lists the
    /// mirror has never seen are seeded with local data.
    pub fn attach_mirror(&self, mirror: Arc<dyn RemoteMirror>) -> Result<()> {
        self.detach_mirror();

        let mut subscriptions = Vec::new();
        for list in ListName::ALL {
            let weak = Arc::downgrade(&self.inner);
            let handler: SnapshotHandler = Arc::new(move |payload: &str| {
                if let Some(inner) = weak.upgrade() {
                    Store { inner }.apply_remote(list, payload);
                }
            });
            let id = mirror
                .subscribe(list.storage_key(), handler)
                .with_context(|| format!("Failed to subscribe to {}", list))?;
            subscriptions.push((list, id));
        }

        info!(mirror = %mirror.describe(), "Attached mirror");
        *self
            .inner
            .mirror
            .lock()
            .map_err(|_| eyre!("Store mirror lock poisoned"))? = Some(Attachment {
            mirror,
            subscriptions,
        });

        for list in ListName::ALL {
            let unseeded = {
                let mut state = self.lock_state()?;
                let seen = state.context(list).remote_seen;
                if seen { None } else { state.cache.read(list.storage_key())? }
            };
            if let Some(payload) = unseeded {
                debug!(list = %list, "Seeding mirror with local list");
                self.push(list, &payload);
            }
        }

        Ok(())
    }

    /// Stop following the mirror; local writes are no longer pushed
    pub fn detach_mirror(&self) {
        let attachment = match self.inner.mirror.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(attachment) = attachment {
            for (list, id) in attachment.subscriptions {
                attachment.mirror.unsubscribe(list.storage_key(), id);
            }
            info!(mirror = %attachment.mirror.describe(), "Detached mirror");
        }
    }

    pub fn mirror_description(&self) -> Option<String> {
        let guard = self.inner.mirror.lock().ok()?;
        guard.as_ref().map(|attachment| attachment.mirror.describe())
    }

    /// Push the cached value of every list. Returns how many were pushed.
    pub fn push_all(&self) -> Result<usize> {
        let _writer = self
            .inner
            .writer
            .lock()
            .map_err(|_| eyre!("Store writer lock poisoned"))?;

        let mut pushed = 0;
        for list in ListName::ALL {
            let payload = self.lock_state()?.cache.read(list.storage_key())?;
            if let Some(payload) = payload {
                if self.push(list, &payload) {
                    pushed += 1;
                }
            }
        }
        Ok(pushed)
    }

    /// Fire-and-forget upsert of a full list. Failures are logged and
    /// counted, never returned; the next write supersedes them.
    fn push(&self, list: ListName, payload: &str) -> bool {
        let mirror = match self.inner.mirror.lock() {
            Ok(guard) => guard.as_ref().map(|attachment| Arc::clone(&attachment.mirror)),
            Err(_) => None,
        };
        let Some(mirror) = mirror else {
            return false;
        };

        let result = mirror.push(list.storage_key(), payload);
        let ok = result.is_ok();
        if let Err(e) = result {
            warn!(list = %list, error = ?e, "Mirror push failed, local data remains authoritative");
        }

        if let Ok(mut state) = self.lock_state() {
            let status = &mut state.context(list).status;
            if ok {
                status.pushes += 1;
            } else {
                status.failed_pushes += 1;
            }
        }
        ok
    }

    /// Offer a snapshot received from the mirror
    ///
    /// The snapshot replaces the local list when it differs byte-for-byte
    /// from the cached value. Such writes are never pushed back.
    pub fn apply_remote(&self, list: ListName, payload: &str) -> RemoteUpdate {
        let mut state = match self.lock_state() {
            Ok(state) => state,
            Err(e) => {
                warn!(list = %list, error = ?e, "Dropping remote update");
                return RemoteUpdate::Rejected;
            }
        };
        let key = list.storage_key();
        let local = state.cache.read(key).unwrap_or_else(|e| {
            warn!(list = %list, error = ?e, "Failed to read cached list, treating as empty");
            None
        });
        if local.as_deref() == Some(payload) {
            state.context(list).remote_seen = true;
            return RemoteUpdate::Unchanged;
        }

        if let Err(e) = entry::deserialize_list(payload) {
            warn!(list = %list, error = %e, "Rejecting malformed remote snapshot");
            state.context(list).status.remote_rejected += 1;
            return RemoteUpdate::Rejected;
        }

        state.context(list).applying_remote = true;
        let written = state.commit(list, |cache| {
            cache.write(key, payload)?;
            Ok(payload.to_string())
        });
        state.context(list).applying_remote = false;

        match written {
            Ok(_) => {
                let ctx = state.context(list);
                ctx.remote_seen = true;
                let status = &mut ctx.status;
                status.remote_applied += 1;
                status.last_remote_at = Some(Utc::now());
                state.broadcast(list);
                info!(list = %list, bytes = payload.len(), "Applied remote update");
                RemoteUpdate::Applied
            }
            Err(e) => {
                warn!(list = %list, error = ?e, "Failed to store remote update");
                state.context(list).status.remote_rejected += 1;
                RemoteUpdate::Rejected
            }
        }
    }

    pub fn sync_status(&self, list: ListName) -> Result<SyncStatus> {
        Ok(self.lock_state()?.context(list).status.clone())
    }

    /// Receive the name of every list changed by a remote update
    pub fn subscribe_changes(&self) -> Result<Receiver<ListName>> {
        let (tx, rx) = mpsc::channel();
        self.lock_state()?.listeners.push(tx);
        Ok(rx)
    }
}

fn unique_id(entries: &[Entry]) -> String {
    loop {
        let id = Uuid::now_v7().to_string();
        if !entries.iter().any(|entry| entry.id == id) {
            return id;
        }
    }
}

fn reorder<S: AsRef<str>>(entries: Vec<Entry>, order: &[S]) -> Vec<Entry> {
    let positions: HashMap<String, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.id.clone(), i))
        .collect();

    let mut slots: Vec<Option<Entry>> = entries.into_iter().map(Some).collect();
    let mut reordered = Vec::with_capacity(slots.len());

    for id in order {
        if let Some(&i) = positions.get(id.as_ref()) {
            if let Some(entry) = slots[i].take() {
                reordered.push(entry);
            }
        }
    }

    reordered.extend(slots.into_iter().flatten());
    reordered
}

/// Current time in milliseconds since the epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
