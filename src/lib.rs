// Clarity - synchronized list storage for a personal productivity dashboard

pub mod cache;
pub mod config;
pub mod digest;
pub mod entry;
pub mod filter;
pub mod mail;
pub mod mirror;
pub mod stats;
pub mod store;

// Re-export main types for convenience
pub use cache::{LocalCache, SqliteCache};
pub use config::Config;
pub use digest::{Digest, Notification, NotificationKind, Priority, Summarizer};
pub use entry::{Difficulty, Entry, EntryPatch, ListName, NewEntry};
pub use filter::{Field, FieldValue, Filter, FilterOp};
pub use mail::{EmailSummary, MailAccount, MailClient};
pub use mirror::{DirectoryMirror, MemoryMirror, MirrorWatcher, RemoteDocument, RemoteMirror};
pub use store::{RemoteUpdate, Store, SyncStatus, now_ms};
