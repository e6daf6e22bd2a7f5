//! Storage layer: filesystem layout, atomic writes, locking, and stores.
//!
//! Every persisted entity is owned exclusively by its file on disk; in-memory
//! copies are derived. Mutation always goes: acquire lock → read fresh from
//! disk → mutate → atomic write → release lock.

pub mod atomic;
pub mod diary;
pub mod jsonl;
pub mod lock;
pub mod paths;
pub mod playbook;

pub use atomic::atomic_write;
pub use diary::DiaryStore;
pub use jsonl::{append_jsonl, read_jsonl};
pub use lock::{with_lock, FileLock, LockInfo};
pub use paths::{find_repo_root, MemoryPaths};
pub use playbook::PlaybookStore;
