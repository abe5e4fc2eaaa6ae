//! Conduit Databank - In-memory caches shared by the client layers
//!
//! [`RequestCache`] memoizes async lookups (bearer tokens, service URLs)
//! and coalesces concurrent fetches of the same key. [`StreamCache`]
//! shares long-lived subscription streams by key, with optional replay of
//! the latest item and a linger before idle streams are torn down.
//!
//! # Example
//!
//! ```no_run
//! use conduit_databank::RequestCache;
//!
//! # async fn example() {
//! let cache = RequestCache::new(|id: u32| async move { Ok::<_, String>(id * 2) });
//! assert_eq!(cache.get(21).await, Ok(42));
//! # }
//! ```

pub mod request_cache;
pub mod stream_cache;

// Re-exports for convenience
pub use request_cache::RequestCache;
pub use stream_cache::{CachedStream, StreamCache, StreamCacheBuilder};
