//! Domain documents stored by the engine.
//!
//! Everything in here is a plain serde document; the store persists these
//! as JSON values inside fjall partitions. Identity and ownership rules:
//!
//! - [`GenerationRecord`] lives in a per-user partition keyed `(uid, id)`
//! - [`LedgerEntry`] is keyed by `(uid, idempotency key)` and immutable
//! - [`UserAccount`] is keyed by `uid` and only mutates together with a
//!   ledger entry
//! - [`MirrorRecord`] lives in a global partition keyed by the source
//!   record id and has no identity of its own
//! - [`StatsCounter`] is a best-effort per-user denormalization

mod ledger;
mod media;
mod mirror;
mod record;
mod stats;

pub use ledger::{EntryStatus, EntryType, LedgerEntry, UserAccount};
pub use media::{MediaItem, MediaKind};
pub use mirror::{DeadMirrorTask, MirrorOp, MirrorRecord, MirrorTask};
pub use record::{GenerationRecord, GenerationStatus, Visibility};
pub use stats::StatsCounter;
