// Remote mirror: shared documents, one per list, with live subscriptions

use eyre::{Context, Result, eyre};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remote representation of one list: the list JSON, carried as a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub payload: String,
}

/// Callback receiving the payload of a changed document
pub type SnapshotHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Shared document store used for cross-device sync
///
/// A push notifies every subscriber of the key, the pusher's own
/// subscription included. Handlers run on the mirror's delivery path and
/// must not call back into the mirror.
pub trait RemoteMirror: Send + Sync {
    /// Upsert the document for `key`
    fn push(&self, key: &str, payload: &str) -> Result<()>;

    /// Register a listener. If the document exists, the handler is called
    /// with its current payload before this returns.
    fn subscribe(&self, key: &str, handler: SnapshotHandler) -> Result<SubscriptionId>;

    fn unsubscribe(&self, key: &str, id: SubscriptionId);

    /// Short description for logs and CLI output
    fn describe(&self) -> String;
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, SnapshotHandler)>>,
}

impl Subscribers {
    fn add(&mut self, key: &str, handler: SnapshotHandler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers.entry(key.to_string()).or_default().push((id, handler));
        id
    }

    fn remove(&mut self, key: &str, id: SubscriptionId) {
        if let Some(list) = self.handlers.get_mut(key) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                self.handlers.remove(key);
            }
        }
    }

    fn keys(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    fn notify(&self, key: &str, payload: &str) -> usize {
        let Some(list) = self.handlers.get(key) else {
            return 0;
        };
        for (_, handler) in list {
            handler(payload);
        }
        list.len()
    }
}

// ============================================================================
// In-process mirror
// ============================================================================

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, RemoteDocument>,
    pushes: HashMap<String, u64>,
    subscribers: Subscribers,
}

/// Mirror held in memory. Several stores attached to one instance behave
/// like several devices sharing a remote account.
#[derive(Default)]
pub struct MemoryMirror {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every push fails
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn document(&self, key: &str) -> Option<RemoteDocument> {
        self.state.lock().ok()?.documents.get(key).cloned()
    }

    /// Successful pushes received for `key`
    pub fn push_count(&self, key: &str) -> u64 {
        self.state
            .lock()
            .map(|state| state.pushes.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl RemoteMirror for MemoryMirror {
    fn push(&self, key: &str, payload: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(eyre!("Mirror is offline"));
        }

        let mut state = self.state.lock().map_err(|_| eyre!("Mirror lock poisoned"))?;
        state.documents.insert(
            key.to_string(),
            RemoteDocument {
                payload: payload.to_string(),
            },
        );
        *state.pushes.entry(key.to_string()).or_insert(0) += 1;

        let notified = state.subscribers.notify(key, payload);
        debug!(key, notified, "Memory mirror push");
        Ok(())
    }

    fn subscribe(&self, key: &str, handler: SnapshotHandler) -> Result<SubscriptionId> {
        let mut state = self.state.lock().map_err(|_| eyre!("Mirror lock poisoned"))?;
        let id = state.subscribers.add(key, handler.clone());

        if let Some(doc) = state.documents.get(key) {
            handler(&doc.payload);
        }
        Ok(id)
    }

    fn unsubscribe(&self, key: &str, id: SubscriptionId) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.remove(key, id);
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Shared-directory mirror
// ============================================================================

#[derive(Default)]
struct DirectoryState {
    /// Last payload delivered or pushed per key
    seen: HashMap<String, String>,
    subscribers: Subscribers,
}

/// Mirror stored as `<dir>/<key>.json` documents, for a folder shared
/// between machines. Changes made by other processes are picked up by
/// `poll_once` or a `MirrorWatcher`.
pub struct DirectoryMirror {
    dir: PathBuf,
    state: Mutex<DirectoryState>,
}

impl DirectoryMirror {
    /// Open or create a mirror directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create mirror directory")?;

        let mirror = Self {
            dir,
            state: Mutex::new(DirectoryState::default()),
        };
        // Create the lock file up front so readers never race its creation
        mirror.lock_file()?;

        info!(dir = ?mirror.dir, "Opened directory mirror");
        Ok(mirror)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(eyre!("Invalid document key: {:?}", key));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    fn lock_file(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.dir.join(".lock"))
            .context("Failed to open mirror lock file")
    }

    /// Read the document for `key` from disk
    pub fn read_document(&self, key: &str) -> Result<Option<RemoteDocument>> {
        let path = self.document_path(key)?;

        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock).context("Failed to acquire shared mirror lock")?;

        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).context("Failed to read mirror document")?;
        let doc = serde_json::from_str(&raw).with_context(|| format!("Malformed mirror document {:?}", path))?;

        // Lock is released when `lock` is dropped
        Ok(Some(doc))
    }

    fn write_document(&self, key: &str, doc: &RemoteDocument) -> Result<()> {
        let path = self.document_path(key)?;
        let tmp_path = self.dir.join(format!(".{}.json.tmp", key));

        let lock = self.lock_file()?;
        FileExt::lock_exclusive(&lock).context("Failed to acquire exclusive mirror lock")?;

        let json = serde_json::to_string(doc)?;
        let mut tmp = File::create(&tmp_path).context("Failed to create temporary mirror document")?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &path).context("Failed to replace mirror document")?;

        Ok(())
    }

    /// Deliver documents changed on disk since they were last seen.
    /// Returns the number of documents delivered.
    pub fn poll_once(&self) -> Result<usize> {
        let mut state = self.state.lock().map_err(|_| eyre!("Mirror lock poisoned"))?;
        let mut delivered = 0;

        for key in state.subscribers.keys() {
            let doc = match self.read_document(&key) {
                Ok(Some(doc)) => doc,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key, error = ?e, "Failed to read mirror document, skipping");
                    continue;
                }
            };

            if state.seen.get(&key) == Some(&doc.payload) {
                continue;
            }

            debug!(key, "Mirror document changed on disk");
            state.seen.insert(key.clone(), doc.payload.clone());
            state.subscribers.notify(&key, &doc.payload);
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Poll in a background thread until the returned watcher is dropped
    pub fn watch(self: &Arc<Self>, interval: Duration) -> MirrorWatcher {
        let mirror = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            debug!(interval_ms = interval.as_millis() as u64, "Mirror watcher started");
            while !stop_flag.load(Ordering::SeqCst) {
                if let Err(e) = mirror.poll_once() {
                    warn!(error = ?e, "Mirror poll failed");
                }
                sleep_unless_stopped(&stop_flag, interval);
            }
            debug!("Mirror watcher stopped");
        });

        MirrorWatcher {
            stop,
            handle: Some(handle),
        }
    }
}

impl RemoteMirror for DirectoryMirror {
    fn push(&self, key: &str, payload: &str) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| eyre!("Mirror lock poisoned"))?;

        let doc = RemoteDocument {
            payload: payload.to_string(),
        };
        self.write_document(key, &doc)?;
        state.seen.insert(key.to_string(), doc.payload);

        let notified = state.subscribers.notify(key, payload);
        debug!(key, notified, "Directory mirror push");
        Ok(())
    }

    fn subscribe(&self, key: &str, handler: SnapshotHandler) -> Result<SubscriptionId> {
        self.document_path(key)?;
        let mut state = self.state.lock().map_err(|_| eyre!("Mirror lock poisoned"))?;
        let id = state.subscribers.add(key, handler.clone());

        match self.read_document(key) {
            Ok(Some(doc)) => {
                state.seen.insert(key.to_string(), doc.payload.clone());
                handler(&doc.payload);
            }
            Ok(None) => {}
            Err(e) => warn!(key, error = ?e, "Failed to read mirror document on subscribe"),
        }
        Ok(id)
    }

    fn unsubscribe(&self, key: &str, id: SubscriptionId) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.remove(key, id);
        }
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < total && !stop.load(Ordering::SeqCst) {
        let nap = step.min(total - waited);
        thread::sleep(nap);
        waited += nap;
    }
}

/// Background poller for a `DirectoryMirror`; stops when dropped
pub struct MirrorWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MirrorWatcher {
    pub fn stop(self) {
        // Drop does the work
    }
}

impl Drop for MirrorWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn recorder() -> (SnapshotHandler, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: SnapshotHandler = Arc::new(move |payload: &str| {
            let _ = tx.lock().unwrap().send(payload.to_string());
        });
        (handler, rx)
    }

    #[test]
    fn test_memory_push_notifies_subscribers() {
        let mirror = MemoryMirror::new();
        let (handler, rx) = recorder();
        mirror.subscribe("clarity_daily_tasks", handler).unwrap();

        mirror.push("clarity_daily_tasks", "[]").unwrap();
        mirror.push("clarity_weekly_goals", "[1]").unwrap();

        assert_eq!(rx.try_recv().unwrap(), "[]");
        assert!(rx.try_recv().is_err());
        assert_eq!(mirror.push_count("clarity_daily_tasks"), 1);
        assert_eq!(
            mirror.document("clarity_weekly_goals"),
            Some(RemoteDocument {
                payload: "[1]".to_string()
            })
        );
    }

    #[test]
    fn test_memory_subscribe_delivers_current_document() {
        let mirror = MemoryMirror::new();
        mirror.push("k", "[\"existing\"]").unwrap();

        let (handler, rx) = recorder();
        mirror.subscribe("k", handler).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "[\"existing\"]");
    }

    #[test]
    fn test_memory_unsubscribe() {
        let mirror = MemoryMirror::new();
        let (handler, rx) = recorder();
        let id = mirror.subscribe("k", handler).unwrap();
        mirror.unsubscribe("k", id);

        mirror.push("k", "[]").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_memory_offline_push_fails() {
        let mirror = MemoryMirror::new();
        mirror.set_offline(true);
        assert!(mirror.push("k", "[]").is_err());
        assert_eq!(mirror.push_count("k"), 0);
        assert!(mirror.document("k").is_none());

        mirror.set_offline(false);
        assert!(mirror.push("k", "[]").is_ok());
    }

    #[test]
    fn test_remote_document_is_double_encoded() {
        let doc = RemoteDocument {
            payload: r#"[{"id":"1"}]"#.to_string(),
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"payload":"[{\"id\":\"1\"}]"}"#);
    }

    #[test]
    fn test_directory_push_writes_document() {
        let temp = TempDir::new().unwrap();
        let mirror = DirectoryMirror::open(temp.path()).unwrap();

        mirror.push("clarity_daily_tasks", "[]").unwrap();

        let raw = fs::read_to_string(temp.path().join("clarity_daily_tasks.json")).unwrap();
        assert_eq!(raw, r#"{"payload":"[]"}"#);
        assert_eq!(
            mirror.read_document("clarity_daily_tasks").unwrap().unwrap().payload,
            "[]"
        );
        assert!(mirror.read_document("clarity_weekly_goals").unwrap().is_none());
    }

    #[test]
    fn test_directory_rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let mirror = DirectoryMirror::open(temp.path()).unwrap();
        assert!(mirror.push("../escape", "[]").is_err());
    }

    #[test]
    fn test_directory_poll_sees_other_writers() {
        let temp = TempDir::new().unwrap();
        let ours = DirectoryMirror::open(temp.path()).unwrap();
        let theirs = DirectoryMirror::open(temp.path()).unwrap();

        let (handler, rx) = recorder();
        ours.subscribe("k", handler).unwrap();

        theirs.push("k", "[\"from elsewhere\"]").unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(ours.poll_once().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), "[\"from elsewhere\"]");

        // Unchanged documents are not delivered twice
        assert_eq!(ours.poll_once().unwrap(), 0);
    }

    #[test]
    fn test_directory_own_push_not_redelivered_by_poll() {
        let temp = TempDir::new().unwrap();
        let mirror = DirectoryMirror::open(temp.path()).unwrap();
        let (handler, rx) = recorder();
        mirror.subscribe("k", handler).unwrap();

        mirror.push("k", "[]").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "[]");
        assert_eq!(mirror.poll_once().unwrap(), 0);
    }

    #[test]
    fn test_watcher_delivers_and_stops() {
        let temp = TempDir::new().unwrap();
        let ours = Arc::new(DirectoryMirror::open(temp.path()).unwrap());
        let theirs = DirectoryMirror::open(temp.path()).unwrap();
        let (handler, rx) = recorder();
        ours.subscribe("k", handler).unwrap();

        let watcher = ours.watch(Duration::from_millis(20));
        theirs.push("k", "[\"x\"]").unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, "[\"x\"]");
        watcher.stop();
    }
}
