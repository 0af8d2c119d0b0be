//! 轮转缓存
//!
//! ## 职责
//!
//! 为每个学习者维护三个槽位，提供即时读取、接收流水线交付的单元、
//! 计算需要准备的槽位，并在掌握状态变化时执行失效判定。
//!
//! ## 并发模型
//!
//! - 学习者表使用 `RwLock`，只在查找/插入时短暂持有
//! - 每个槽位一把 `Mutex`，同一槽位的 `store` 串行执行
//! - 所有方法都是同步的，临界区内没有 await
//! - 计数使用原子操作（见 [`CacheMetrics`]）

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::invalidation::{self, InvalidationCriteria, InvalidationOutcome, InvalidationReason};
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::config::CacheConfig;
use crate::error::{AppError, AppResult};
use crate::models::content::ContentUnit;
use crate::models::process::ProcessId;
use crate::models::slot::{CacheState, SlotId, SlotState};

/// `store` 的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReceipt {
    /// 是否真正写入（过时的单元会被丢弃）
    pub cached: bool,
    pub cached_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// 被丢弃时的原因
    pub stale_reason: Option<&'static str>,
}

/// 槽位可用性
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub is_ready: bool,
    pub progress_fraction: f64,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub preparing: Option<ProcessId>,
}

/// 需要准备的槽位
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparationNeeds {
    /// 没有有效内容的槽位
    pub slots_needing_work: Vec<SlotId>,
    /// 其中正在消费的槽位
    pub urgent_slots: Vec<SlotId>,
    /// 已经有准备在进行的槽位
    pub in_progress: Vec<SlotId>,
}

impl PreparationNeeds {
    pub fn is_empty(&self) -> bool {
        self.slots_needing_work.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveSlot {
    slot: SlotId,
    rotated_at: DateTime<Utc>,
}

/// 单个学习者的条目
#[derive(Debug)]
struct LearnerEntry {
    learner_id: String,
    slots: [Mutex<SlotState>; 3],
    live: Mutex<LiveSlot>,
    created_at: DateTime<Utc>,
    last_access_ms: AtomicI64,
}

impl LearnerEntry {
    fn new(learner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            slots: Default::default(),
            live: Mutex::new(LiveSlot {
                slot: SlotId::A,
                rotated_at: now,
            }),
            created_at: now,
            last_access_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    fn slot(&self, slot: SlotId) -> MutexGuard<'_, SlotState> {
        self.slots[slot.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> MutexGuard<'_, LiveSlot> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_access_ms
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
    }
}

/// 轮转缓存
#[derive(Debug)]
pub struct RotatingCache {
    learners: RwLock<HashMap<String, Arc<LearnerEntry>>>,
    metrics: CacheMetrics,
    config: CacheConfig,
}

impl Default for RotatingCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl RotatingCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            learners: RwLock::new(HashMap::new()),
            metrics: CacheMetrics::default(),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 为学习者建立全新的三槽位状态
    ///
    /// 已存在的状态会被重置；达到容量上限时淘汰最久未访问的学习者。
    pub fn preload(&self, learner_id: &str) {
        let now = Utc::now();
        let mut learners = self.learners.write().unwrap_or_else(PoisonError::into_inner);

        if !learners.contains_key(learner_id) && learners.len() >= self.config.max_learners {
            let oldest = learners
                .values()
                .min_by_key(|entry| entry.last_access_ms.load(Ordering::Relaxed))
                .map(|entry| entry.learner_id.clone());
            if let Some(evicted) = oldest {
                learners.remove(&evicted);
                info!("[学习者 {}] ♻️ 达到容量上限，淘汰最久未访问的缓存", evicted);
            }
        }

        learners.insert(learner_id.to_string(), Arc::new(LearnerEntry::new(learner_id, now)));
        info!("[学习者 {}] 📦 已建立三槽位缓存", learner_id);
    }

    /// 学习者是否已 preload
    pub fn contains(&self, learner_id: &str) -> bool {
        self.learners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(learner_id)
    }

    pub fn learner_count(&self) -> usize {
        self.learners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 读取槽位内容（不会触发准备）
    pub fn get(&self, learner_id: &str, slot: SlotId) -> AppResult<Arc<ContentUnit>> {
        let entry = self.entry(learner_id)?;
        let now = Utc::now();
        entry.touch(now);

        let state = entry.slot(slot);
        match &state.unit {
            None => {
                self.metrics.record_miss(false);
                Err(AppError::cache_miss(learner_id, slot))
            }
            Some(_) if !state.is_valid_at(now) => {
                self.metrics.record_miss(true);
                Err(AppError::CacheExpired {
                    learner_id: learner_id.to_string(),
                    slot,
                })
            }
            Some(unit) => {
                self.metrics.record_hit();
                Ok(Arc::clone(unit))
            }
        }
    }

    /// 写入流水线交付的单元
    ///
    /// 同一槽位上，准备开始得更早的单元不会覆盖更新的单元；
    /// 在最近一次失效或学习者缓存重建之前开始的准备也会被丢弃。
    pub fn store(&self, unit: impl Into<Arc<ContentUnit>>) -> AppResult<StoreReceipt> {
        let unit: Arc<ContentUnit> = unit.into();
        let entry = self.entry(&unit.learner_id)?;
        let now = Utc::now();
        entry.touch(now);

        let slot = unit.slot;
        let preparation_time = (unit.assembled_at - unit.preparation_started_at)
            .to_std()
            .unwrap_or_default();

        let mut state = entry.slot(slot);
        if state.preparation_id == Some(unit.process_id) {
            state.finish_preparation();
        }

        if let Some(reason) = stale_reason(&state, &unit, entry.created_at) {
            warn!(
                "[学习者 {}] ⚠️ 槽位 {} 丢弃过时单元 (进程 {}): {}",
                unit.learner_id, slot, unit.process_id, reason
            );
            self.metrics.record_store(preparation_time, false);
            return Ok(StoreReceipt {
                cached: false,
                cached_at: state.cached_at.unwrap_or(now),
                valid_until: state.valid_until.unwrap_or(now),
                stale_reason: Some(reason),
            });
        }

        let valid_until = now + self.config.unit_ttl;
        debug!(
            "[学习者 {}] 槽位 {} 写入 {} 道题 (质量 {:.2})",
            unit.learner_id,
            slot,
            unit.len(),
            unit.quality_score
        );

        state.unit = Some(unit);
        state.cached_at = Some(now);
        state.valid_until = Some(valid_until);
        drop(state);

        self.metrics.record_store(preparation_time, true);
        Ok(StoreReceipt {
            cached: true,
            cached_at: now,
            valid_until,
            stale_reason: None,
        })
    }

    /// 执行失效判定
    pub fn invalidate(
        &self,
        learner_id: &str,
        criteria: &InvalidationCriteria,
    ) -> AppResult<InvalidationOutcome> {
        let entry = self.entry(learner_id)?;
        let now = Utc::now();
        entry.touch(now);

        // 依次锁住三个槽位，保证判定与清除针对同一份状态
        let mut guards: Vec<MutexGuard<'_, SlotState>> =
            SlotId::ALL.into_iter().map(|slot| entry.slot(slot)).collect();
        let snapshot: [SlotState; 3] = [guards[0].clone(), guards[1].clone(), guards[2].clone()];

        let criteria = criteria.clone().resolve_max_age(self.config.max_cache_age);
        let (reason, slots) = invalidation::decide(&criteria, &snapshot, now);
        for slot in &slots {
            guards[slot.index()].discard_unit(now);
        }
        drop(guards);

        if reason == InvalidationReason::NotRequired {
            debug!("[学习者 {}] 无需失效", learner_id);
        } else {
            info!(
                "[学习者 {}] 🧹 失效 {:?} (原因: {})",
                learner_id,
                slots,
                reason.description()
            );
        }

        Ok(InvalidationOutcome {
            invalidated_slots: slots,
            reason,
            timestamp: now,
        })
    }

    /// 槽位可用性（不阻塞）
    pub fn availability(&self, learner_id: &str, slot: SlotId) -> AppResult<Availability> {
        let entry = self.entry(learner_id)?;
        let now = Utc::now();
        entry.touch(now);

        let state = entry.slot(slot);
        if state.is_valid_at(now) {
            return Ok(Availability {
                is_ready: true,
                progress_fraction: 1.0,
                estimated_ready_at: None,
                preparing: state.preparation_id,
            });
        }

        Ok(Availability {
            is_ready: false,
            progress_fraction: if state.preparation_id.is_some() {
                state.preparation_progress
            } else {
                0.0
            },
            estimated_ready_at: state.estimated_ready_at,
            preparing: state.preparation_id,
        })
    }

    /// 计算需要准备的槽位
    pub fn needs_preparation(&self, learner_id: &str) -> AppResult<PreparationNeeds> {
        let entry = self.entry(learner_id)?;
        let now = Utc::now();
        entry.touch(now);

        let live_slot = entry.live().slot;
        let mut needs = PreparationNeeds {
            slots_needing_work: Vec::new(),
            urgent_slots: Vec::new(),
            in_progress: Vec::new(),
        };

        for slot in SlotId::ALL {
            let state = entry.slot(slot);
            if state.is_valid_at(now) {
                continue;
            }
            needs.slots_needing_work.push(slot);
            if slot == live_slot {
                needs.urgent_slots.push(slot);
            }
            if state.preparation_id.is_some() {
                needs.in_progress.push(slot);
            }
        }

        Ok(needs)
    }

    /// 切换消费槽位，返回之前的消费槽位
    ///
    /// 不检查新槽位是否就绪，调用方应先查询 [`availability`](Self::availability)。
    pub fn rotate(&self, learner_id: &str, new_live_slot: SlotId) -> AppResult<SlotId> {
        let entry = self.entry(learner_id)?;
        let now = Utc::now();
        entry.touch(now);

        let mut live = entry.live();
        let previous = live.slot;
        live.slot = new_live_slot;
        live.rotated_at = now;

        debug!("[学习者 {}] 🔄 消费槽位 {} → {}", learner_id, previous, new_live_slot);
        Ok(previous)
    }

    /// 按 A → B → C → A 的顺序切换到下一个槽位
    pub fn advance(&self, learner_id: &str) -> AppResult<SlotId> {
        let next = self.live_slot(learner_id)?.next();
        self.rotate(learner_id, next)?;
        Ok(next)
    }

    pub fn live_slot(&self, learner_id: &str) -> AppResult<SlotId> {
        Ok(self.entry(learner_id)?.live().slot)
    }

    /// 丢弃已消费完的单元，使槽位重新进入待准备状态
    pub fn retire(&self, learner_id: &str, slot: SlotId) -> AppResult<()> {
        let entry = self.entry(learner_id)?;
        let now = Utc::now();
        entry.touch(now);
        entry.slot(slot).discard_unit(now);
        debug!("[学习者 {}] 槽位 {} 已消费完毕", learner_id, slot);
        Ok(())
    }

    /// 清除学习者的全部缓存，返回是否存在
    pub fn clear(&self, learner_id: &str) -> bool {
        let removed = self
            .learners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(learner_id)
            .is_some();
        if removed {
            info!("[学习者 {}] 🗑️ 已清除缓存", learner_id);
        }
        removed
    }

    /// 学习者缓存状态的快照
    pub fn snapshot(&self, learner_id: &str) -> AppResult<CacheState> {
        let entry = self.entry(learner_id)?;
        let live = *entry.live();

        let mut state = CacheState::new(entry.learner_id.as_str(), entry.created_at);
        state.slots = SlotId::ALL.map(|slot| entry.slot(slot).clone());
        state.live_slot = live.slot;
        state.last_rotation_at = live.rotated_at;
        Ok(state)
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 平均准备耗时，供流水线估算完成时间
    pub fn avg_preparation_time(&self) -> Option<std::time::Duration> {
        self.metrics.avg_preparation_time()
    }

    // ========== 流水线回报 ==========

    /// 标记槽位开始准备
    pub fn begin_preparation(
        &self,
        learner_id: &str,
        slot: SlotId,
        process_id: ProcessId,
        estimated_ready_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let entry = self.entry(learner_id)?;
        let mut state = entry.slot(slot);
        state.preparation_id = Some(process_id);
        state.preparation_progress = 0.0;
        state.estimated_ready_at = estimated_ready_at;
        Ok(())
    }

    /// 更新准备进度；只接受当前登记的进程
    pub fn report_progress(
        &self,
        learner_id: &str,
        slot: SlotId,
        process_id: ProcessId,
        progress: f64,
    ) {
        let Ok(entry) = self.entry(learner_id) else {
            return;
        };
        let mut state = entry.slot(slot);
        if state.preparation_id == Some(process_id) {
            state.preparation_progress = state.preparation_progress.max(progress.clamp(0.0, 1.0));
        }
    }

    /// 槽位上登记的是否仍是该进程
    ///
    /// 学习者被清除或重建后返回 `false`。
    pub fn is_preparing(&self, learner_id: &str, slot: SlotId, process_id: ProcessId) -> bool {
        self.entry(learner_id)
            .map(|entry| entry.slot(slot).preparation_id == Some(process_id))
            .unwrap_or(false)
    }

    /// 准备未交付单元就结束（失败或取消）
    pub fn end_preparation(&self, learner_id: &str, slot: SlotId, process_id: ProcessId, failed: bool) {
        if failed {
            self.metrics.record_preparation_failure();
        }
        let Ok(entry) = self.entry(learner_id) else {
            return;
        };
        let mut state = entry.slot(slot);
        if state.preparation_id == Some(process_id) {
            state.finish_preparation();
        }
    }

    fn entry(&self, learner_id: &str) -> AppResult<Arc<LearnerEntry>> {
        self.learners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(learner_id)
            .cloned()
            .ok_or_else(|| AppError::learner_not_found(learner_id))
    }
}

fn stale_reason(
    state: &SlotState,
    unit: &ContentUnit,
    learner_created_at: DateTime<Utc>,
) -> Option<&'static str> {
    if unit.preparation_started_at < learner_created_at {
        return Some("准备开始于学习者缓存重建之前");
    }
    if let Some(current) = &state.unit {
        if unit.preparation_started_at < current.preparation_started_at {
            return Some("槽位中已有更新的单元");
        }
    }
    if let Some(invalidated_at) = state.invalidated_at {
        if unit.preparation_started_at < invalidated_at {
            return Some("准备开始于最近一次失效之前");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::tests::sample_unit;
    use chrono::Duration;

    fn cache() -> RotatingCache {
        RotatingCache::new(CacheConfig::default())
    }

    #[test]
    fn test_store_then_get_returns_same_unit() {
        let cache = cache();
        cache.preload("l1");

        let unit = sample_unit("l1", SlotId::B, Utc::now());
        let receipt = cache.store(unit.clone()).unwrap();
        assert!(receipt.cached);
        assert_eq!(receipt.valid_until - receipt.cached_at, Duration::hours(24));

        let fetched = cache.get("l1", SlotId::B).unwrap();
        assert_eq!(*fetched, unit);
        assert_eq!(fetched.len(), 20);
    }

    #[test]
    fn test_get_miss_and_unknown_learner() {
        let cache = cache();
        assert_eq!(cache.get("nobody", SlotId::A).unwrap_err().code(), "LEARNER_NOT_FOUND");

        cache.preload("l1");
        assert_eq!(cache.get("l1", SlotId::A).unwrap_err().code(), "CACHE_MISS");
        assert_eq!(cache.metrics().miss_count, 1);
    }

    #[test]
    fn test_expired_unit_is_not_served() {
        let cache = RotatingCache::new(CacheConfig {
            unit_ttl: Duration::zero(),
            ..CacheConfig::default()
        });
        cache.preload("l1");
        cache.store(sample_unit("l1", SlotId::A, Utc::now())).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = cache.get("l1", SlotId::A).unwrap_err();
        assert_eq!(err.code(), "CACHE_EXPIRED");
        assert!(!cache.availability("l1", SlotId::A).unwrap().is_ready);
    }

    #[test]
    fn test_older_preparation_does_not_overwrite_newer() {
        let cache = cache();
        cache.preload("l1");
        let now = Utc::now();

        let newer = sample_unit("l1", SlotId::C, now + Duration::milliseconds(5));
        let older = sample_unit("l1", SlotId::C, now);

        assert!(cache.store(newer.clone()).unwrap().cached);
        let receipt = cache.store(older).unwrap();
        assert!(!receipt.cached);
        assert_eq!(receipt.stale_reason, Some("槽位中已有更新的单元"));
        assert_eq!(*cache.get("l1", SlotId::C).unwrap(), newer);
        assert_eq!(cache.metrics().stale_store_count, 1);
    }

    #[test]
    fn test_store_started_before_invalidation_is_discarded() {
        let cache = cache();
        cache.preload("l1");
        let started = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(3));

        cache.invalidate("l1", &InvalidationCriteria::boundary_changed()).unwrap();
        let receipt = cache.store(sample_unit("l1", SlotId::A, started)).unwrap();
        assert!(!receipt.cached);
        assert_eq!(receipt.stale_reason, Some("准备开始于最近一次失效之前"));
        assert_eq!(cache.get("l1", SlotId::A).unwrap_err().code(), "CACHE_MISS");
    }

    #[test]
    fn test_boundary_change_clears_all_slots() {
        let cache = cache();
        cache.preload("l1");
        let started = Utc::now();
        for slot in SlotId::ALL {
            assert!(cache.store(sample_unit("l1", slot, started)).unwrap().cached);
        }

        let criteria = InvalidationCriteria {
            boundary_level_changed: true,
            max_age: Some(Duration::zero()),
            max_age_exceeded: false,
            progression_milestone: true,
            force: true,
        };
        let outcome = cache.invalidate("l1", &criteria).unwrap();
        assert_eq!(outcome.reason, InvalidationReason::BoundaryLevelChange);
        assert_eq!(outcome.invalidated_slots, SlotId::ALL.to_vec());
        for slot in SlotId::ALL {
            assert_eq!(cache.get("l1", slot).unwrap_err().code(), "CACHE_MISS");
        }
    }

    #[test]
    fn test_age_criterion_uses_configured_max_age() {
        let cache = RotatingCache::new(CacheConfig {
            max_cache_age: Duration::zero(),
            ..CacheConfig::default()
        });
        cache.preload("l1");
        cache.store(sample_unit("l1", SlotId::B, Utc::now())).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(3));

        let outcome = cache.invalidate("l1", &InvalidationCriteria::aged()).unwrap();
        assert_eq!(outcome.reason, InvalidationReason::AgeExpired);
        assert_eq!(outcome.invalidated_slots, vec![SlotId::B]);
        assert_eq!(cache.get("l1", SlotId::B).unwrap_err().code(), "CACHE_MISS");

        // 默认 24 小时内的内容不受影响
        let fresh = self::cache();
        fresh.preload("l1");
        fresh.store(sample_unit("l1", SlotId::B, Utc::now())).unwrap();
        let outcome = fresh.invalidate("l1", &InvalidationCriteria::aged()).unwrap();
        assert_eq!(outcome.reason, InvalidationReason::NotRequired);
        assert!(fresh.get("l1", SlotId::B).is_ok());
    }

    #[test]
    fn test_unit_prepared_before_reset_is_discarded() {
        let cache = cache();
        cache.preload("l1");
        let process_id = ProcessId::new();
        let started = Utc::now();
        cache.begin_preparation("l1", SlotId::B, process_id, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(3));

        cache.clear("l1");
        cache.preload("l1");
        assert!(!cache.is_preparing("l1", SlotId::B, process_id));
        assert_eq!(cache.availability("l1", SlotId::B).unwrap().preparing, None);

        let receipt = cache.store(sample_unit("l1", SlotId::B, started)).unwrap();
        assert!(!receipt.cached);
        assert_eq!(receipt.stale_reason, Some("准备开始于学习者缓存重建之前"));
        assert_eq!(cache.get("l1", SlotId::B).unwrap_err().code(), "CACHE_MISS");
    }

    #[test]
    fn test_snapshot_reflects_slots_and_live_pointer() {
        let cache = cache();
        cache.preload("l1");
        cache.store(sample_unit("l1", SlotId::C, Utc::now())).unwrap();
        cache.rotate("l1", SlotId::C).unwrap();

        let state = cache.snapshot("l1").unwrap();
        assert_eq!(state.learner_id, "l1");
        assert_eq!(state.live_slot, SlotId::C);
        assert!(state.slot(SlotId::C).unit.is_some());
        assert!(state.slot(SlotId::A).unit.is_none());
        assert!(state.last_rotation_at >= state.created_at);
        assert_eq!(cache.snapshot("nobody").unwrap_err().code(), "LEARNER_NOT_FOUND");
    }

    #[test]
    fn test_needs_preparation_after_preload() {
        let cache = cache();
        cache.preload("l1");

        let needs = cache.needs_preparation("l1").unwrap();
        assert_eq!(needs.slots_needing_work, SlotId::ALL.to_vec());
        assert_eq!(needs.urgent_slots, vec![SlotId::A]);

        cache.store(sample_unit("l1", SlotId::A, Utc::now())).unwrap();
        let needs = cache.needs_preparation("l1").unwrap();
        assert_eq!(needs.slots_needing_work, vec![SlotId::B, SlotId::C]);
        assert!(needs.urgent_slots.is_empty());
    }

    #[test]
    fn test_rotate_and_advance() {
        let cache = cache();
        cache.preload("l1");

        assert_eq!(cache.rotate("l1", SlotId::C).unwrap(), SlotId::A);
        assert_eq!(cache.live_slot("l1").unwrap(), SlotId::C);
        assert_eq!(cache.advance("l1").unwrap(), SlotId::A);

        let needs = cache.needs_preparation("l1").unwrap();
        assert_eq!(needs.urgent_slots, vec![SlotId::A]);
    }

    #[test]
    fn test_availability_reports_progress() {
        let cache = cache();
        cache.preload("l1");
        let process_id = ProcessId::new();

        cache.begin_preparation("l1", SlotId::B, process_id, None).unwrap();
        cache.report_progress("l1", SlotId::B, process_id, 0.4);
        cache.report_progress("l1", SlotId::B, ProcessId::new(), 0.9);

        let availability = cache.availability("l1", SlotId::B).unwrap();
        assert!(!availability.is_ready);
        assert_eq!(availability.progress_fraction, 0.4);
        assert_eq!(availability.preparing, Some(process_id));

        cache.end_preparation("l1", SlotId::B, process_id, true);
        let availability = cache.availability("l1", SlotId::B).unwrap();
        assert_eq!(availability.progress_fraction, 0.0);
        assert_eq!(cache.metrics().preparation_failures, 1);
    }

    #[test]
    fn test_retire_and_clear() {
        let cache = cache();
        cache.preload("l1");
        cache.store(sample_unit("l1", SlotId::A, Utc::now())).unwrap();

        cache.retire("l1", SlotId::A).unwrap();
        assert_eq!(cache.get("l1", SlotId::A).unwrap_err().code(), "CACHE_MISS");

        assert!(cache.clear("l1"));
        assert!(!cache.clear("l1"));
        assert_eq!(cache.needs_preparation("l1").unwrap_err().code(), "LEARNER_NOT_FOUND");
    }

    #[test]
    fn test_least_recently_used_learner_is_evicted() {
        let cache = RotatingCache::new(CacheConfig {
            max_learners: 2,
            ..CacheConfig::default()
        });
        cache.preload("l1");
        std::thread::sleep(std::time::Duration::from_millis(3));
        cache.preload("l2");
        std::thread::sleep(std::time::Duration::from_millis(3));
        // 访问 l1，使 l2 成为最久未访问
        let _ = cache.get("l1", SlotId::A);

        cache.preload("l3");
        assert_eq!(cache.learner_count(), 2);
        assert!(cache.contains("l1"));
        assert!(!cache.contains("l2"));
        assert!(cache.contains("l3"));
    }
}
