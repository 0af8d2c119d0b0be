//! 缓存运行计数
//!
//! 读路径（`get`）与写路径（`store`、流水线结束）跨学习者并发更新，
//! 所以全部使用原子计数。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    stores: AtomicU64,
    stale_stores: AtomicU64,
    preparation_successes: AtomicU64,
    preparation_failures: AtomicU64,
    preparation_time_ms_total: AtomicU64,
}

/// 计数快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hit_rate: f64,
    pub avg_preparation_time: Duration,
    pub miss_count: u64,
    pub background_success_rate: f64,
    pub hit_count: u64,
    pub expired_count: u64,
    pub store_count: u64,
    pub stale_store_count: u64,
    pub preparation_failures: u64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// 过期也计为未命中
    pub fn record_miss(&self, expired: bool) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        if expired {
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 流水线交付了一个单元
    pub fn record_store(&self, preparation_time: Duration, accepted: bool) {
        self.preparation_successes.fetch_add(1, Ordering::Relaxed);
        self.preparation_time_ms_total
            .fetch_add(preparation_time.as_millis() as u64, Ordering::Relaxed);
        if accepted {
            self.stores.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stale_stores.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_preparation_failure(&self) {
        self.preparation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 平均准备耗时；尚无完成的准备时为 `None`
    pub fn avg_preparation_time(&self) -> Option<Duration> {
        let count = self.preparation_successes.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let total = self.preparation_time_ms_total.load(Ordering::Relaxed);
        Some(Duration::from_millis(total / count))
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let successes = self.preparation_successes.load(Ordering::Relaxed);
        let failures = self.preparation_failures.load(Ordering::Relaxed);

        CacheMetricsSnapshot {
            hit_rate: ratio(hits, hits + misses),
            avg_preparation_time: self.avg_preparation_time().unwrap_or_default(),
            miss_count: misses,
            background_success_rate: ratio(successes, successes + failures),
            hit_count: hits,
            expired_count: self.expired.load(Ordering::Relaxed),
            store_count: self.stores.load(Ordering::Relaxed),
            stale_store_count: self.stale_stores.load(Ordering::Relaxed),
            preparation_failures: failures,
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
