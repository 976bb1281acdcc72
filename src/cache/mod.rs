//! In-memory outcome caching.
//!
//! The cache is a performance layer only. Each tree gets its own
//! [`RiskResultCache`], and changing a node clears exactly the ancestor path
//! whose aggregates depended on it.

pub mod manager;
pub mod resolver;
pub mod result_cache;

pub use manager::{InvalidationEvent, InvalidationReason, TreeCacheManager};
pub use resolver::RiskResultResolver;
pub use result_cache::RiskResultCache;
