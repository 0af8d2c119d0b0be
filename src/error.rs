use thiserror::Error;

use crate::models::process::{ProcessId, Stage};
use crate::models::slot::SlotId;

/// 应用程序错误类型
///
/// 每个变体对应一个稳定的错误代码（见 [`AppError::code`]），
/// 供编排层按代码分支处理，而不是解析错误文本。
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// 可用事实不足 20 条（已排除近期见过的事实）
    #[error("可用事实不足: 概念 {concept} 仅有 {available} 条, 需要 {required} 条")]
    InsufficientFacts {
        concept: String,
        available: usize,
        required: usize,
    },

    /// 掌握边界查询失败
    #[error("掌握边界评估失败 (学习者: {learner_id}): {reason}")]
    BoundaryAssessmentFailed { learner_id: String, reason: String },

    /// 干扰项生成失败
    #[error("干扰项生成失败 (事实: {fact_id}): {reason}")]
    DistractorGenerationFailed { fact_id: String, reason: String },

    /// 组装后有效题目不足 20 道
    #[error("组装质量过低: 有效题目 {valid} 道, 需要 {required} 道 ({detail})")]
    AssemblyQualityTooLow {
        valid: usize,
        required: usize,
        detail: String,
    },

    /// 单元交付时槽位已被失效或重置，缓存拒绝写入
    #[error("内容单元已过时 (学习者: {learner_id}, 槽位: {slot}): {reason}")]
    UnitSuperseded {
        learner_id: String,
        slot: SlotId,
        reason: String,
    },

    /// 限时准备超时
    #[error("准备超时: {deadline_ms}ms 内未完成")]
    PreparationTimeout { deadline_ms: u64 },

    /// 同一 (学习者, 槽位) 已有准备在进行
    #[error("槽位 {slot} 已在准备中 (学习者: {learner_id}, 进程: {process_id})")]
    AlreadyPreparing {
        learner_id: String,
        slot: SlotId,
        process_id: ProcessId,
    },

    /// 进程不存在或已被回收
    #[error("准备进程不存在: {process_id}")]
    ProcessNotFound { process_id: ProcessId },

    /// 槽位中没有内容
    #[error("缓存未命中 (学习者: {learner_id}, 槽位: {slot})")]
    CacheMiss { learner_id: String, slot: SlotId },

    /// 槽位中的内容已过期
    #[error("缓存已过期 (学习者: {learner_id}, 槽位: {slot})")]
    CacheExpired { learner_id: String, slot: SlotId },

    /// 无法识别的槽位
    #[error("槽位不存在: {slot}")]
    SlotNotFound { slot: String },

    /// 学习者尚未 preload 或已被清除
    #[error("学习者不存在: {learner_id}")]
    LearnerNotFound { learner_id: String },

    /// 准备被取消
    #[error("准备已取消: {process_id}")]
    PreparationCancelled { process_id: ProcessId },

    /// 请求参数无效
    #[error("请求无效: {0}")]
    InvalidRequest(String),

    /// 配置无效
    #[error("配置无效: {0}")]
    ConfigInvalid(String),

    /// 后台任务异常终止
    #[error("后台任务异常终止: {0}")]
    TaskAborted(String),

    /// 带阶段标记的流水线失败
    #[error("阶段 {stage} 失败: {source}")]
    StageFailure {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// 稳定的错误代码
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InsufficientFacts { .. } => "INSUFFICIENT_FACTS",
            AppError::BoundaryAssessmentFailed { .. } => "BOUNDARY_ASSESSMENT_FAILED",
            AppError::DistractorGenerationFailed { .. } => "DISTRACTOR_GENERATION_FAILED",
            AppError::AssemblyQualityTooLow { .. } => "ASSEMBLY_QUALITY_TOO_LOW",
            AppError::UnitSuperseded { .. } => "UNIT_SUPERSEDED",
            AppError::PreparationTimeout { .. } => "PREPARATION_TIMEOUT",
            AppError::AlreadyPreparing { .. } => "ALREADY_PREPARING",
            AppError::ProcessNotFound { .. } => "PROCESS_NOT_FOUND",
            AppError::CacheMiss { .. } => "CACHE_MISS",
            AppError::CacheExpired { .. } => "CACHE_EXPIRED",
            AppError::SlotNotFound { .. } => "SLOT_NOT_FOUND",
            AppError::LearnerNotFound { .. } => "LEARNER_NOT_FOUND",
            AppError::PreparationCancelled { .. } => "PREPARATION_CANCELLED",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::ConfigInvalid(_) => "CONFIG_INVALID",
            AppError::TaskAborted(_) => "TASK_ABORTED",
            AppError::StageFailure { source, .. } => source.code(),
        }
    }

    /// 是否为可预期、可恢复的情况
    ///
    /// 缓存未命中/过期/单元过时应触发准备；已在准备中应轮询现有进程；
    /// 超时应降级为较慢的体验。
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            AppError::CacheMiss { .. }
                | AppError::CacheExpired { .. }
                | AppError::UnitSuperseded { .. }
                | AppError::AlreadyPreparing { .. }
                | AppError::PreparationTimeout { .. }
        )
    }

    /// 失败发生的阶段（如果有）
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AppError::StageFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// 去掉阶段包装后的原始错误
    pub fn root(&self) -> &AppError {
        match self {
            AppError::StageFailure { source, .. } => source.root(),
            other => other,
        }
    }

    /// 给错误打上阶段标记
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            already @ AppError::StageFailure { .. } => already,
            other => AppError::StageFailure {
                stage,
                source: Box::new(other),
            },
        }
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    pub fn cache_miss(learner_id: impl Into<String>, slot: SlotId) -> Self {
        AppError::CacheMiss {
            learner_id: learner_id.into(),
            slot,
        }
    }

    pub fn learner_not_found(learner_id: impl Into<String>) -> Self {
        AppError::LearnerNotFound {
            learner_id: learner_id.into(),
        }
    }

    pub fn quality_too_low(valid: usize, required: usize, detail: impl Into<String>) -> Self {
        AppError::AssemblyQualityTooLow {
            valid,
            required,
            detail: detail.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
