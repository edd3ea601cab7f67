//! Response cache: key derivation and the persistent entry store
//!
//! Keys are derived canonically from an operation and its parameters, and
//! entries carry the epoch-millisecond timestamp of the fetch that produced
//! them. Freshness is a read-time decision; stale entries stay on disk until
//! they are overwritten or the namespace is wiped.

mod key;
mod store;

pub use key::{build_key, CACHE_KEY_PREFIX};
pub use store::{CacheEntry, CacheStore};
