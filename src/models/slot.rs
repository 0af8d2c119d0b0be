//! 槽位与缓存状态
//!
//! 每个学习者固定拥有三个槽位（A/B/C），轮流扮演
//! "消费中 / 就绪 / 准备中" 三种角色。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::content::ContentUnit;
use crate::models::process::ProcessId;

/// 槽位编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotId {
    A,
    B,
    C,
}

impl SlotId {
    /// 全部槽位（按轮转顺序）
    pub const ALL: [SlotId; 3] = [SlotId::A, SlotId::B, SlotId::C];

    /// 在 `CacheState::slots` 中的下标
    pub fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
            SlotId::C => 2,
        }
    }

    /// 从下标解析
    pub fn from_index(index: usize) -> AppResult<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| AppError::SlotNotFound {
                slot: index.to_string(),
            })
    }

    /// 轮转顺序中的下一个槽位
    pub fn next(self) -> Self {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::C,
            SlotId::C => SlotId::A,
        }
    }

    /// 从字符串解析（不区分大小写，接受 "a" / "slot_a" / "0"）
    pub fn parse(s: &str) -> AppResult<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let key = normalized.strip_prefix("slot_").unwrap_or(&normalized);
        match key {
            "a" => Ok(SlotId::A),
            "b" => Ok(SlotId::B),
            "c" => Ok(SlotId::C),
            digits => match digits.parse::<usize>() {
                Ok(index) => Self::from_index(index),
                Err(_) => Err(AppError::SlotNotFound {
                    slot: s.to_string(),
                }),
            },
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotId::A => "A",
            SlotId::B => "B",
            SlotId::C => "C",
        };
        write!(f, "{}", name)
    }
}

/// 单个槽位的状态
///
/// 只由缓存组件修改：内容来自 `store`，进度来自流水线回报，
/// 清空来自失效判定。
#[derive(Debug, Clone, Default)]
pub struct SlotState {
    /// 当前内容
    pub unit: Option<Arc<ContentUnit>>,
    /// 正在进行的准备
    pub preparation_id: Option<ProcessId>,
    /// 准备进度 [0, 1]
    pub preparation_progress: f64,
    /// 预计就绪时间
    pub estimated_ready_at: Option<DateTime<Utc>>,
    /// 内容写入时间
    pub cached_at: Option<DateTime<Utc>>,
    /// 超过此时间内容即视为过期
    pub valid_until: Option<DateTime<Utc>>,
    /// 最近一次被失效清空的时间
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl SlotState {
    /// 在 `now` 时刻是否持有可服务的内容
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.unit, self.valid_until) {
            (Some(_), Some(valid_until)) => now <= valid_until,
            _ => false,
        }
    }

    /// 清空内容（保留进行中的准备标记）
    pub fn discard_unit(&mut self, now: DateTime<Utc>) {
        self.unit = None;
        self.cached_at = None;
        self.valid_until = None;
        self.invalidated_at = Some(now);
    }

    /// 结束准备标记
    pub fn finish_preparation(&mut self) {
        self.preparation_id = None;
        self.preparation_progress = 0.0;
        self.estimated_ready_at = None;
    }
}

/// 单个学习者的缓存状态
#[derive(Debug, Clone)]
pub struct CacheState {
    pub learner_id: String,
    /// 固定三个槽位
    pub slots: [SlotState; 3],
    /// 当前消费中的槽位
    pub live_slot: SlotId,
    pub last_rotation_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CacheState {
    /// 新学习者的空白状态，A 为消费槽位
    pub fn new(learner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.into(),
            slots: Default::default(),
            live_slot: SlotId::A,
            last_rotation_at: now,
            created_at: now,
        }
    }

    pub fn slot(&self, slot: SlotId) -> &SlotState {
        &self.slots[slot.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slot() {
        assert_eq!(SlotId::parse("a").unwrap(), SlotId::A);
        assert_eq!(SlotId::parse(" Slot_B ").unwrap(), SlotId::B);
        assert_eq!(SlotId::parse("2").unwrap(), SlotId::C);

        let err = SlotId::parse("D").unwrap_err();
        assert_eq!(err.code(), "SLOT_NOT_FOUND");
        assert_eq!(SlotId::parse("7").unwrap_err().code(), "SLOT_NOT_FOUND");
        assert_eq!(SlotId::from_index(3).unwrap_err().code(), "SLOT_NOT_FOUND");
    }

    #[test]
    fn test_next_cycles_through_all_slots() {
        assert_eq!(SlotId::A.next(), SlotId::B);
        assert_eq!(SlotId::B.next(), SlotId::C);
        assert_eq!(SlotId::C.next(), SlotId::A);
    }

    #[test]
    fn test_new_state_has_three_empty_slots() {
        let state = CacheState::new("learner-1", Utc::now());
        assert_eq!(state.slots.len(), 3);
        assert_eq!(state.live_slot, SlotId::A);
        assert!(state.slots.iter().all(|s| s.unit.is_none()));
    }
}
