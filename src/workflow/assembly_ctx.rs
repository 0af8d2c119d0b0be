//! 组装上下文
//!
//! 封装"我正在为哪个学习者的哪个槽位组装"这一信息，
//! 以及各阶段之间传递的中间结果。

use std::collections::HashSet;
use std::fmt::Display;

use chrono::{DateTime, Utc};

use crate::models::content::{ConceptDescriptor, Fact, Question};
use crate::models::process::ProcessId;
use crate::models::slot::SlotId;
use crate::services::DifficultyRange;

/// 由掌握边界等级推导出的组装参数
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryProfile {
    pub level: u32,
    /// 干扰项难度区间
    pub difficulty: DifficultyRange,
    /// 题目文本的最大词数
    pub max_words: usize,
}

impl BoundaryProfile {
    /// 等级约定为 1..=10，超出部分按边界处理
    pub fn from_level(level: u32, max_question_words: usize) -> Self {
        let clamped = level.clamp(1, 10) as f64;
        let difficulty = DifficultyRange::new((clamped - 1.0) / 10.0, (clamped + 1.0) / 10.0);
        let max_words = (max_question_words / 2 + level.min(10) as usize * 2).min(max_question_words);

        Self {
            level,
            difficulty,
            max_words: max_words.max(1),
        }
    }
}

/// 已格式化的候选题
#[derive(Debug, Clone)]
pub struct FormattedQuestion {
    pub fact: Fact,
    pub text: String,
    /// 在候选列表中的位置
    pub position: usize,
}

/// 组装上下文
#[derive(Debug, Clone)]
pub struct AssemblyCtx {
    pub process_id: ProcessId,
    pub learner_id: String,
    pub slot: SlotId,
    pub concept: ConceptDescriptor,
    /// 准备开始时间，同时用于派生洗牌种子
    pub started_at: DateTime<Utc>,
    /// 需要排除的近期事实
    pub recently_seen: HashSet<String>,

    // --- 阶段产出 ---
    pub candidates: Vec<Fact>,
    pub boundary: Option<BoundaryProfile>,
    pub formatted: Vec<FormattedQuestion>,
    /// 与 `formatted` 一一对应
    pub distractors: Vec<String>,
    pub questions: Vec<Question>,
    /// 与 `questions` 一一对应的候选位置
    pub positions: Vec<usize>,
    pub quality_score: f64,
}

impl AssemblyCtx {
    pub fn new(
        process_id: ProcessId,
        learner_id: impl Into<String>,
        slot: SlotId,
        concept: ConceptDescriptor,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            process_id,
            learner_id: learner_id.into(),
            slot,
            concept,
            started_at,
            recently_seen: HashSet::new(),
            candidates: Vec::new(),
            boundary: None,
            formatted: Vec::new(),
            distractors: Vec::new(),
            questions: Vec::new(),
            positions: Vec::new(),
            quality_score: 0.0,
        }
    }

    pub fn with_recently_seen(mut self, fact_ids: impl IntoIterator<Item = String>) -> Self {
        self.recently_seen = fact_ids.into_iter().collect();
        self
    }
}

impl Display for AssemblyCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[学习者 {} 槽位 {} 概念 {}]",
            self.learner_id, self.slot, self.concept.code
        )
    }
}
