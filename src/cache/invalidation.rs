//! 失效判定
//!
//! 按优先级依次检查：边界等级变化 > 缓存年龄 > 进度里程碑 > 强制刷新。
//! 第一个生效的条件决定结果，每次调用只报告一个原因。

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::slot::{SlotId, SlotState};

/// 失效条件
#[derive(Debug, Clone, Default)]
pub struct InvalidationCriteria {
    /// 学习者掌握边界发生变化
    pub boundary_level_changed: bool,
    /// 清除缓存时间超过该值的槽位
    pub max_age: Option<Duration>,
    /// 按缓存配置的最大年龄清除（`max_age` 优先）
    pub max_age_exceeded: bool,
    /// 学习者达到进度里程碑
    pub progression_milestone: bool,
    /// 调用方强制刷新
    pub force: bool,
}

impl InvalidationCriteria {
    pub fn boundary_changed() -> Self {
        Self {
            boundary_level_changed: true,
            ..Self::default()
        }
    }

    pub fn older_than(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            ..Self::default()
        }
    }

    /// 使用缓存配置的 `max_cache_age`
    pub fn aged() -> Self {
        Self {
            max_age_exceeded: true,
            ..Self::default()
        }
    }

    /// 补全年龄条件：请求了按配置年龄清除但未给出具体值时使用 `configured`
    pub fn resolve_max_age(mut self, configured: Duration) -> Self {
        if self.max_age_exceeded && self.max_age.is_none() {
            self.max_age = Some(configured);
        }
        self
    }

    pub fn milestone() -> Self {
        Self {
            progression_milestone: true,
            ..Self::default()
        }
    }

    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// 失效原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    BoundaryLevelChange,
    AgeExpired,
    ProgressionMilestone,
    Forced,
    /// 没有条件生效
    NotRequired,
}

impl InvalidationReason {
    pub fn description(self) -> &'static str {
        match self {
            InvalidationReason::BoundaryLevelChange => "boundary level change",
            InvalidationReason::AgeExpired => "cache age exceeded",
            InvalidationReason::ProgressionMilestone => "progression milestone",
            InvalidationReason::Forced => "forced refresh",
            InvalidationReason::NotRequired => "no invalidation required",
        }
    }
}

/// 失效结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidationOutcome {
    pub invalidated_slots: Vec<SlotId>,
    pub reason: InvalidationReason,
    pub timestamp: DateTime<Utc>,
}

/// 根据条件和当前槽位决定要清除哪些槽位
pub fn decide(
    criteria: &InvalidationCriteria,
    slots: &[SlotState; 3],
    now: DateTime<Utc>,
) -> (InvalidationReason, Vec<SlotId>) {
    if criteria.boundary_level_changed {
        return (InvalidationReason::BoundaryLevelChange, SlotId::ALL.to_vec());
    }

    if let Some(max_age) = criteria.max_age {
        let aged: Vec<SlotId> = SlotId::ALL
            .into_iter()
            .filter(|slot| {
                slots[slot.index()]
                    .cached_at
                    .is_some_and(|cached_at| now - cached_at > max_age)
            })
            .collect();
        if !aged.is_empty() {
            return (InvalidationReason::AgeExpired, aged);
        }
    }

    if criteria.progression_milestone {
        return (InvalidationReason::ProgressionMilestone, SlotId::ALL.to_vec());
    }

    if criteria.force {
        return (InvalidationReason::Forced, SlotId::ALL.to_vec());
    }

    (InvalidationReason::NotRequired, Vec::new())
}
