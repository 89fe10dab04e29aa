pub mod index;
pub mod persist;
pub mod store;
pub mod usage;

/// Opaque sticker/document identifier supplied by the host application.
pub type ItemId = u64;

pub use index::KeywordIndex;
pub use persist::FormatVersion;
pub use store::{KeywordStore, QueryHit};
pub use usage::UsageCounter;
