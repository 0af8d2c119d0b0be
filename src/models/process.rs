//! 准备进程记录
//!
//! 一次流水线运行对应一个 [`PreparationProcess`]，记录每个阶段的进度与错误。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::content::ConceptDescriptor;
use crate::models::slot::SlotId;

/// 准备进程 ID（即对外的进程句柄）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 流水线的七个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    FactSelection,
    BoundaryAssessment,
    QuestionFormatting,
    DistractorGeneration,
    QuestionAssembly,
    ShuffleQuality,
    UnitAssembly,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::FactSelection,
        Stage::BoundaryAssessment,
        Stage::QuestionFormatting,
        Stage::DistractorGeneration,
        Stage::QuestionAssembly,
        Stage::ShuffleQuality,
        Stage::UnitAssembly,
    ];

    /// 阶段序号（从 0 开始）
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::FactSelection => "fact_selection",
            Stage::BoundaryAssessment => "boundary_assessment",
            Stage::QuestionFormatting => "question_formatting",
            Stage::DistractorGeneration => "distractor_generation",
            Stage::QuestionAssembly => "question_assembly",
            Stage::ShuffleQuality => "shuffle_quality",
            Stage::UnitAssembly => "unit_assembly",
        }
    }

    /// 阶段内进度换算为整体进度
    pub fn overall_progress(self, within_stage: f64) -> f64 {
        let total = Stage::ALL.len() as f64;
        (self.ordinal() as f64 + within_stage.clamp(0.0, 1.0)) / total
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 进程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled
        )
    }
}

/// 准备优先级
///
/// `Urgent` 不占用并发许可，立即开始；其余按许可排队。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    Urgent,
}

/// 单个阶段的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// 一次准备运行
#[derive(Debug, Clone, Serialize)]
pub struct PreparationProcess {
    pub id: ProcessId,
    pub learner_id: String,
    pub slot: SlotId,
    pub concept: ConceptDescriptor,
    pub stages: Vec<StageRecord>,
    pub overall_progress: f64,
    pub status: ProcessStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 终止时的错误代码与描述
    pub error: Option<String>,
}

impl PreparationProcess {
    pub fn new(
        learner_id: impl Into<String>,
        slot: SlotId,
        concept: ConceptDescriptor,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProcessId::new(),
            learner_id: learner_id.into(),
            slot,
            concept,
            stages: Vec::new(),
            overall_progress: 0.0,
            status: ProcessStatus::Queued,
            priority,
            created_at: now,
            started_at: None,
            estimated_completion_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 推进整体进度；只增不减，终态后不再变化
    pub fn advance(&mut self, progress: f64) {
        if self.is_terminal() {
            return;
        }
        self.overall_progress = self.overall_progress.max(progress.clamp(0.0, 1.0));
    }

    /// 记录阶段开始
    pub fn begin_stage(&mut self, stage: Stage, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.stages.push(StageRecord {
            stage,
            progress: 0.0,
            started_at: now,
            finished_at: None,
            errors: Vec::new(),
        });
        self.advance(stage.overall_progress(0.0));
    }

    /// 更新当前阶段的进度
    pub fn stage_progress(&mut self, stage: Stage, within_stage: f64) {
        if self.is_terminal() {
            return;
        }
        if let Some(record) = self.current_stage_mut(stage) {
            record.progress = record.progress.max(within_stage.clamp(0.0, 1.0));
        }
        self.advance(stage.overall_progress(within_stage));
    }

    /// 记录阶段完成
    pub fn finish_stage(&mut self, stage: Stage, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        if let Some(record) = self.current_stage_mut(stage) {
            record.progress = 1.0;
            record.finished_at = Some(now);
        }
        self.advance(stage.overall_progress(1.0));
    }

    /// 给阶段追加一条非致命告警
    pub fn note_stage_issue(&mut self, stage: Stage, message: impl Into<String>) {
        if let Some(record) = self.current_stage_mut(stage) {
            record.errors.push(message.into());
        }
    }

    /// 标记完成
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.overall_progress = 1.0;
        self.status = ProcessStatus::Completed;
        self.completed_at = Some(now);
    }

    /// 标记失败，错误同时写入失败阶段的记录
    pub fn mark_failed(&mut self, stage: Option<Stage>, error: impl Into<String>, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        let error = error.into();
        if let Some(stage) = stage {
            if let Some(record) = self.current_stage_mut(stage) {
                record.errors.push(error.clone());
                record.finished_at = Some(now);
            }
        }
        self.status = ProcessStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(now);
    }

    /// 标记取消
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.status = ProcessStatus::Cancelled;
        self.completed_at = Some(now);
    }

    fn current_stage_mut(&mut self, stage: Stage) -> Option<&mut StageRecord> {
        self.stages.iter_mut().rev().find(|r| r.stage == stage)
    }
}

/// 批量准备句柄
#[derive(Debug, Clone, Default)]
pub struct BatchHandle {
    /// 已接受的子进程
    pub process_ids: Vec<ProcessId>,
    /// 被拒绝的请求：(请求下标, 错误代码, 描述)
    pub rejected: Vec<(usize, &'static str, String)>,
}

impl BatchHandle {
    pub fn accepted(&self) -> usize {
        self.process_ids.len()
    }
}
