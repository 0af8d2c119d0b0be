use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::process::ProcessId;
use crate::models::slot::SlotId;

/// 每个内容单元固定包含的题目数
pub const QUESTIONS_PER_UNIT: usize = 20;

/// 事实目录中的一条事实
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    /// 陈述，如 "7 × 8"
    pub statement: String,
    /// 正确答案
    pub answer: String,
    /// 事实族（如 "7 × 8" 与 "8 × 7" 同族）；缺省时视为独立一族
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

impl Fact {
    pub fn new(
        id: impl Into<String>,
        statement: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            statement: statement.into(),
            answer: answer.into(),
            family: None,
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// 用于相邻检测的事实族键
    pub fn family_key(&self) -> &str {
        self.family.as_deref().unwrap_or(&self.id)
    }
}

/// 内容概念描述
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptDescriptor {
    /// 概念代码，如 "times_tables"
    pub code: String,
    /// 格式模板 ID（见 `workflow::formatting`）
    #[serde(default = "default_template")]
    pub template_id: String,
}

fn default_template() -> String {
    "question".to_string()
}

impl ConceptDescriptor {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            template_id: default_template(),
        }
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }
}

/// 题目元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMeta {
    pub concept_code: String,
    pub fact_id: String,
    pub fact_family: String,
    pub boundary_level: u32,
    pub template_id: String,
    pub assembled_at: DateTime<Utc>,
}

/// 一道完整的题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub correct_answer: String,
    pub distractor: String,
    pub meta: QuestionMeta,
}

/// 组装完成、可直接服务的内容单元
///
/// 创建后不可变；同一槽位的新单元只会整体替换旧单元。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    questions: Vec<Question>,
    pub concept_code: String,
    pub boundary_level: u32,
    pub learner_id: String,
    pub slot: SlotId,
    pub quality_score: f64,
    pub process_id: ProcessId,
    /// 对应准备开始的时间，用于丢弃过时写入
    pub preparation_started_at: DateTime<Utc>,
    pub assembled_at: DateTime<Utc>,
}

/// 构造 [`ContentUnit`] 所需的元数据
#[derive(Debug, Clone)]
pub struct UnitMeta {
    pub concept_code: String,
    pub boundary_level: u32,
    pub learner_id: String,
    pub slot: SlotId,
    pub quality_score: f64,
    pub process_id: ProcessId,
    pub preparation_started_at: DateTime<Utc>,
    pub assembled_at: DateTime<Utc>,
}

impl ContentUnit {
    /// 打包题目；题目数必须恰好为 [`QUESTIONS_PER_UNIT`]
    pub fn new(questions: Vec<Question>, meta: UnitMeta) -> AppResult<Self> {
        if questions.len() != QUESTIONS_PER_UNIT {
            return Err(AppError::quality_too_low(
                questions.len(),
                QUESTIONS_PER_UNIT,
                "内容单元题目数不正确",
            ));
        }

        Ok(Self {
            questions,
            concept_code: meta.concept_code,
            boundary_level: meta.boundary_level,
            learner_id: meta.learner_id,
            slot: meta.slot,
            quality_score: meta.quality_score,
            process_id: meta.process_id,
            preparation_started_at: meta.preparation_started_at,
            assembled_at: meta.assembled_at,
        })
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
