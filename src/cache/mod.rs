//! 缓存层（Cache Layer）
//!
//! - `rotating_cache` - 每个学习者三个槽位的轮转缓存
//! - `invalidation` - 失效条件与判定顺序
//! - `metrics` - 命中率、准备耗时等原子计数

pub mod invalidation;
pub mod metrics;
pub mod rotating_cache;

pub use invalidation::{InvalidationCriteria, InvalidationOutcome, InvalidationReason};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use rotating_cache::{Availability, PreparationNeeds, RotatingCache, StoreReceipt};
