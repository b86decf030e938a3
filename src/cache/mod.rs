//! Response cache.
//!
//! # Data Flow
//! ```text
//! request method + URI
//!     → key.rs (KeySelector, normalized key)
//!     → store.rs (CacheStore lookup, TTL)
//!     → hit: cached body served by the cache decorator
//!     → miss: captured body upserted on a 2xx completion
//! ```
//!
//! # Design Decisions
//! - Only `GET` and `HEAD` are cacheable
//! - Query parameters are sorted so parameter order does not split entries
//! - Concurrent misses for one key each run the handler and upsert; there is
//!   no request coalescing
//! - Store errors never fail a response, they only skip the cache side effect

pub mod key;
pub mod store;

pub use key::{CacheKey, KeySelector, DEFAULT_BYPASS_PARAM};
pub use store::{CacheEntry, CacheStore, MemoryStore, StoreError};
