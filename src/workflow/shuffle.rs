//! 洗牌质量保证
//!
//! 1. 以 (学习者, 槽位, 准备时间) 派生的种子做随机排列，可复现
//! 2. 修正同一事实族相邻出现的情况
//! 3. 相邻校验
//! 4. 可预测度检查：相邻两题在候选顺序中也相邻（差 1）的比例，
//!    过高说明目录顺序泄露到了题序中
//!
//! 校验失败时换用派生种子重试。

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

use crate::models::slot::SlotId;

/// 由学习者、槽位和时间派生种子
pub fn derive_seed(learner_id: &str, slot: SlotId, at: DateTime<Utc>) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(learner_id.as_bytes());
    hasher.update(b"|");
    hasher.update(slot.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(at.timestamp_millis().to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// 对 0..len 做种子排列
pub fn permute(len: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    order
}

/// 修正同族相邻：与后面最近的一个不同族元素交换
pub fn correct_family_runs(order: &mut [usize], families: &[&str]) {
    for i in 1..order.len() {
        let previous = families[order[i - 1]];
        if families[order[i]] != previous {
            continue;
        }
        if let Some(j) = ((i + 1)..order.len()).find(|&j| families[order[j]] != previous) {
            order.swap(i, j);
        }
    }
}

/// 第一处同族相邻的位置
pub fn first_adjacent_family(order: &[usize], families: &[&str]) -> Option<usize> {
    order
        .windows(2)
        .position(|pair| families[pair[0]] == families[pair[1]])
        .map(|i| i + 1)
}

/// 可预测度：候选顺序中相邻的题目在结果中仍然相邻的比例
pub fn predictability(order: &[usize]) -> f64 {
    if order.len() < 2 {
        return 0.0;
    }
    let sequential = order
        .windows(2)
        .filter(|pair| pair[0].abs_diff(pair[1]) == 1)
        .count();
    sequential as f64 / (order.len() - 1) as f64
}

/// 洗牌策略
#[derive(Debug, Clone, Copy)]
pub struct ShufflePolicy {
    pub attempts: usize,
    pub max_predictability: f64,
}

/// 洗牌结果
#[derive(Debug, Clone, PartialEq)]
pub struct Arrangement {
    /// 结果中第 k 题对应输入的下标
    pub order: Vec<usize>,
    pub predictability: f64,
    /// 实际使用的尝试次数
    pub attempts: usize,
    /// 被拒绝的尝试及原因
    pub rejections: Vec<String>,
}

impl Arrangement {
    pub fn quality_score(&self) -> f64 {
        1.0 - self.predictability
    }
}

/// 执行完整的洗牌质量流程
pub fn arrange(families: &[&str], seed: u64, policy: ShufflePolicy) -> Result<Arrangement, Vec<String>> {
    let mut rejections = Vec::new();

    for attempt in 0..policy.attempts.max(1) {
        let attempt_seed = seed.wrapping_add(attempt as u64);
        let mut order = permute(families.len(), attempt_seed);
        correct_family_runs(&mut order, families);

        if let Some(position) = first_adjacent_family(&order, families) {
            rejections.push(format!(
                "尝试 {}: 位置 {} 与前一题同族 ({})",
                attempt + 1,
                position,
                families[order[position]]
            ));
            continue;
        }

        let score = predictability(&order);
        if score > policy.max_predictability {
            rejections.push(format!(
                "尝试 {}: 可预测度 {:.2} 超过上限 {:.2}",
                attempt + 1,
                score,
                policy.max_predictability
            ));
            continue;
        }

        return Ok(Arrangement {
            order,
            predictability: score,
            attempts: attempt + 1,
            rejections,
        });
    }

    Err(rejections)
}
