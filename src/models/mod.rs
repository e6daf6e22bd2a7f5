//! Data models for cass-memory.
//!
//! This module contains all the core data structures used throughout the
//! system: the playbook and its bullets, session diaries, playbook deltas,
//! trauma entries, and outcome records.

mod bullet;
mod delta;
mod diary;
mod outcome;
mod playbook;
mod trauma;

pub use bullet::{
    BulletKind, BulletScope, BulletState, FeedbackEvent, FeedbackType, Maturity, PlaybookBullet,
    generate_bullet_id,
};
pub use delta::{dedup_deltas, DraftBullet, PlaybookDelta};
pub use diary::{DiaryEntry, SessionStatus};
pub use outcome::{Outcome, OutcomeRecord, ProcessedEntry};
pub use playbook::{DeprecatedPattern, Playbook, PlaybookMetadata, PLAYBOOK_SCHEMA_VERSION};
pub use trauma::{TraumaEntry, TraumaSeverity, TraumaStatus, TriggerEvent};
