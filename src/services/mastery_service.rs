//! 掌握度服务 - 业务能力层
//!
//! 只负责"查询学习者掌握边界"能力

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

/// 掌握边界查询
#[async_trait]
pub trait MasteryService: Send + Sync {
    /// 学习者当前的掌握边界等级
    async fn boundary_level(&self, learner_id: &str) -> Result<u32>;
}

/// 静态掌握度服务
///
/// 保存每个学习者的边界等级，未登记的学习者使用默认等级。
#[derive(Debug)]
pub struct StaticMasteryService {
    levels: RwLock<HashMap<String, u32>>,
    default_level: u32,
}

impl StaticMasteryService {
    pub fn new(default_level: u32) -> Self {
        Self {
            levels: RwLock::new(HashMap::new()),
            default_level,
        }
    }

    /// 设置学习者等级，返回等级是否发生变化
    pub fn set_level(&self, learner_id: impl Into<String>, level: u32) -> bool {
        let mut levels = self.levels.write().unwrap_or_else(PoisonError::into_inner);
        let learner_id = learner_id.into();
        let previous = levels.insert(learner_id, level).unwrap_or(self.default_level);
        previous != level
    }
}

impl Default for StaticMasteryService {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl MasteryService for StaticMasteryService {
    async fn boundary_level(&self, learner_id: &str) -> Result<u32> {
        let level = self
            .levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(learner_id)
            .copied()
            .unwrap_or(self.default_level);
        Ok(level)
    }
}
