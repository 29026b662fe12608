//! Rule persistence for pmguard.
//!
//! - `RuleStore`: create/read/update/cancel plus the engine-only transitions
//! - `EventLog`: append-only audit trail with a best-effort journal writer
//! - `JsonLinesJournal`: crash-tolerant JSON Lines files

pub mod error;
pub mod events;
pub mod journal;
pub mod rules;

pub use error::{StoreError, StoreResult};
pub use events::{EventLog, DEFAULT_PAGE_SIZE};
pub use journal::JsonLinesJournal;
pub use rules::RuleStore;
