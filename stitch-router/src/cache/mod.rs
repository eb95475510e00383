//! Response caching driven by `@cacheControl` hints.
//!
//! Every field of a response contributes a hint; the response policy is the smallest `maxAge`
//! and the most restrictive scope among them. Shareable responses to queries are memoized in an
//! LRU store bounded by a byte budget.

mod cache_control;
mod policy;
mod storage;

pub(crate) use cache_control::CacheControl;
pub use policy::CacheHint;
pub(crate) use policy::CACHE_CONTROL_DIRECTIVE;
pub(crate) use policy::CACHE_CONTROL_SCOPE;
pub(crate) use policy::CACHE_CONTROL_SDL;
pub(crate) use policy::CacheHints;
pub use policy::CachePolicy;
pub use policy::CacheScope;
pub(crate) use storage::CacheKey;
pub(crate) use storage::ResponseCache;
