//! 组装流程 - 流程层
//!
//! 核心职责：定义"一个内容单元"的完整组装流程
//!
//! 流程顺序：
//! 1. 选取事实 → 2. 边界评估 → 3. 格式化 → 4. 生成干扰项
//! 5. 组装题目 → 6. 洗牌质量保证 → 7. 打包内容单元
//!
//! 每个阶段之间检查取消标记；外部服务调用与取消信号竞争，
//! 取消后立即放弃。写入缓存不在本层完成，由编排层负责。

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::models::content::{ContentUnit, Question, QuestionMeta, UnitMeta, QUESTIONS_PER_UNIT};
use crate::models::process::Stage;
use crate::services::{DistractorGenerator, DistractorRequest, FactCatalog, MasteryService};
use crate::workflow::assembly_ctx::{AssemblyCtx, BoundaryProfile, FormattedQuestion};
use crate::workflow::formatting::QuestionFormatter;
use crate::workflow::shuffle::{self, ShufflePolicy};

/// 阶段进度回报
pub trait ProgressSink: Send + Sync {
    fn stage_started(&self, stage: Stage);
    fn stage_progress(&self, stage: Stage, within_stage: f64);
    fn stage_finished(&self, stage: Stage);
    /// 非致命问题（被拒绝的候选等）
    fn stage_issue(&self, stage: Stage, message: String);
}

/// 不做任何事的回报
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_progress(&self, _stage: Stage, _within_stage: f64) {}
    fn stage_finished(&self, _stage: Stage) {}
    fn stage_issue(&self, _stage: Stage, _message: String) {}
}

/// 组装流程
///
/// - 编排七个阶段
/// - 只依赖业务能力（services）
/// - 不持有缓存，不修改槽位
pub struct AssemblyFlow {
    catalog: Arc<dyn FactCatalog>,
    mastery: Arc<dyn MasteryService>,
    distractors: Arc<dyn DistractorGenerator>,
    config: PipelineConfig,
}

macro_rules! run_stage {
    ($ctx:expr, $sink:expr, $token:expr, $stage:expr, $body:expr) => {{
        checkpoint($ctx, $token)?;
        $sink.stage_started($stage);
        debug!("{} ▶ 阶段 {}", $ctx, $stage);
        $body.await.map_err(|e: AppError| e.at_stage($stage))?;
        $sink.stage_finished($stage);
    }};
}

impl AssemblyFlow {
    pub fn new(
        catalog: Arc<dyn FactCatalog>,
        mastery: Arc<dyn MasteryService>,
        distractors: Arc<dyn DistractorGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog,
            mastery,
            distractors,
            config,
        }
    }

    /// 执行七个阶段，返回打包好的内容单元
    pub async fn run(
        &self,
        ctx: &mut AssemblyCtx,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> AppResult<ContentUnit> {
        run_stage!(ctx, sink, token, Stage::FactSelection, self.select_facts(ctx, sink, token));
        run_stage!(ctx, sink, token, Stage::BoundaryAssessment, self.assess_boundary(ctx, token));
        run_stage!(ctx, sink, token, Stage::QuestionFormatting, self.format_questions(ctx, sink));
        run_stage!(ctx, sink, token, Stage::DistractorGeneration, self.generate_distractors(ctx, sink, token));
        run_stage!(ctx, sink, token, Stage::QuestionAssembly, self.assemble_questions(ctx, sink));
        run_stage!(ctx, sink, token, Stage::ShuffleQuality, self.shuffle_questions(ctx, sink));

        // 阶段 7 的开始在这里记录，完成由编排层在写入缓存后记录
        checkpoint(ctx, token)?;
        sink.stage_started(Stage::UnitAssembly);
        let unit = self.package_unit(ctx).map_err(|e| e.at_stage(Stage::UnitAssembly))?;

        info!(
            "{} ✓ 内容单元组装完成: {} 道题, 质量 {:.2}",
            ctx,
            unit.len(),
            unit.quality_score
        );
        Ok(unit)
    }

    /// 阶段 1：选取事实
    async fn select_facts(
        &self,
        ctx: &mut AssemblyCtx,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> AppResult<()> {
        let facts = match cancellable(ctx, token, self.catalog.query(&ctx.concept)).await? {
            Ok(facts) => facts,
            Err(e) => {
                warn!("{} ⚠️ 事实目录查询失败: {}", ctx, e);
                sink.stage_issue(Stage::FactSelection, format!("事实目录查询失败: {}", e));
                Vec::new()
            }
        };

        let mut seen_ids = std::collections::HashSet::new();
        let eligible: Vec<_> = facts
            .into_iter()
            .filter(|fact| !ctx.recently_seen.contains(&fact.id))
            .filter(|fact| seen_ids.insert(fact.id.clone()))
            .collect();

        if eligible.len() < QUESTIONS_PER_UNIT {
            return Err(AppError::InsufficientFacts {
                concept: ctx.concept.code.clone(),
                available: eligible.len(),
                required: QUESTIONS_PER_UNIT,
            });
        }

        // 用种子抽取候选，再按目录顺序排列
        let wanted = (QUESTIONS_PER_UNIT + self.config.spare_questions).min(eligible.len());
        let seed = shuffle::derive_seed(&ctx.learner_id, ctx.slot, ctx.started_at);
        let mut picked: Vec<usize> = (0..eligible.len()).collect();
        picked.shuffle(&mut StdRng::seed_from_u64(seed.rotate_left(17)));
        picked.truncate(wanted);
        picked.sort_unstable();

        ctx.candidates = picked.into_iter().map(|i| eligible[i].clone()).collect();
        debug!(
            "{} 选取 {} 条候选事实 (可用 {})",
            ctx,
            ctx.candidates.len(),
            eligible.len()
        );
        Ok(())
    }

    /// 阶段 2：边界评估
    async fn assess_boundary(&self, ctx: &mut AssemblyCtx, token: &CancellationToken) -> AppResult<()> {
        let level = cancellable(ctx, token, self.mastery.boundary_level(&ctx.learner_id))
            .await?
            .map_err(|e| AppError::BoundaryAssessmentFailed {
                learner_id: ctx.learner_id.clone(),
                reason: e.to_string(),
            })?;

        let profile = BoundaryProfile::from_level(level, self.config.max_question_words);
        debug!(
            "{} 边界等级 {} → 难度 [{:.2}, {:.2}], 最多 {} 词",
            ctx, level, profile.difficulty.min, profile.difficulty.max, profile.max_words
        );
        ctx.boundary = Some(profile);
        Ok(())
    }

    /// 阶段 3：格式化
    async fn format_questions(&self, ctx: &mut AssemblyCtx, sink: &dyn ProgressSink) -> AppResult<()> {
        let profile = boundary(ctx)?;
        let formatter = QuestionFormatter::new(&ctx.concept.template_id, profile.max_words)?;
        let keep = QUESTIONS_PER_UNIT + self.config.spare_questions;
        let total = ctx.candidates.len();

        let mut formatted = Vec::new();
        for (position, fact) in ctx.candidates.iter().enumerate() {
            match formatter.format(fact) {
                Ok(text) => formatted.push(FormattedQuestion {
                    fact: fact.clone(),
                    text,
                    position,
                }),
                Err(rejection) => {
                    sink.stage_issue(
                        Stage::QuestionFormatting,
                        format!("事实 {} 格式不合格: {}", fact.id, rejection),
                    );
                }
            }
            sink.stage_progress(Stage::QuestionFormatting, (position + 1) as f64 / total as f64);
            if formatted.len() >= keep {
                break;
            }
        }

        if formatted.len() < QUESTIONS_PER_UNIT {
            return Err(AppError::quality_too_low(
                formatted.len(),
                QUESTIONS_PER_UNIT,
                "格式检查后题目不足",
            ));
        }

        ctx.formatted = formatted;
        Ok(())
    }

    /// 阶段 4：生成干扰项
    async fn generate_distractors(
        &self,
        ctx: &mut AssemblyCtx,
        sink: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> AppResult<()> {
        let difficulty = boundary(ctx)?.difficulty;
        let total = ctx.formatted.len();
        let mut chosen: Vec<String> = Vec::with_capacity(total);

        for (i, item) in ctx.formatted.iter().enumerate() {
            let request = DistractorRequest {
                correct_answer: item.fact.answer.clone(),
                difficulty,
                avoid_patterns: chosen.clone(),
                concept: ctx.concept.clone(),
            };

            let distractor = cancellable(ctx, token, self.distractors.generate(request))
                .await?
                .map_err(|e| AppError::DistractorGenerationFailed {
                    fact_id: item.fact.id.clone(),
                    reason: e.to_string(),
                })?;

            chosen.push(distractor);
            sink.stage_progress(Stage::DistractorGeneration, (i + 1) as f64 / total as f64);
        }

        ctx.distractors = chosen;
        Ok(())
    }

    /// 阶段 5：组装题目
    async fn assemble_questions(&self, ctx: &mut AssemblyCtx, sink: &dyn ProgressSink) -> AppResult<()> {
        let level = boundary(ctx)?.level;
        let assembled_at = Utc::now();

        let mut questions = Vec::with_capacity(QUESTIONS_PER_UNIT);
        let mut positions = Vec::with_capacity(QUESTIONS_PER_UNIT);

        for (item, distractor) in ctx.formatted.iter().zip(&ctx.distractors) {
            if questions.len() == QUESTIONS_PER_UNIT {
                break;
            }
            let answer = item.fact.answer.trim();
            let problem = if item.text.trim().is_empty() {
                Some("缺少题目文本")
            } else if answer.is_empty() {
                Some("缺少正确答案")
            } else if distractor.trim().is_empty() || distractor.trim() == answer {
                Some("干扰项无效")
            } else {
                None
            };

            if let Some(problem) = problem {
                sink.stage_issue(
                    Stage::QuestionAssembly,
                    format!("事实 {} 被拒绝: {}", item.fact.id, problem),
                );
                continue;
            }

            questions.push(Question {
                text: item.text.clone(),
                correct_answer: answer.to_string(),
                distractor: distractor.trim().to_string(),
                meta: QuestionMeta {
                    concept_code: ctx.concept.code.clone(),
                    fact_id: item.fact.id.clone(),
                    fact_family: item.fact.family_key().to_string(),
                    boundary_level: level,
                    template_id: ctx.concept.template_id.clone(),
                    assembled_at,
                },
            });
            positions.push(item.position);
        }

        if questions.len() < QUESTIONS_PER_UNIT {
            return Err(AppError::quality_too_low(
                questions.len(),
                QUESTIONS_PER_UNIT,
                "组装后有效题目不足",
            ));
        }

        ctx.questions = questions;
        ctx.positions = positions;
        Ok(())
    }

    /// 阶段 6：洗牌质量保证
    async fn shuffle_questions(&self, ctx: &mut AssemblyCtx, sink: &dyn ProgressSink) -> AppResult<()> {
        let seed = shuffle::derive_seed(&ctx.learner_id, ctx.slot, ctx.started_at);
        let policy = ShufflePolicy {
            attempts: self.config.shuffle_attempts,
            max_predictability: self.config.max_predictability,
        };

        // 可预测度按候选位置计算，族按题目元数据
        let families: Vec<&str> = ctx.questions.iter().map(|q| q.meta.fact_family.as_str()).collect();
        let arrangement = match shuffle::arrange(&families, seed, policy) {
            Ok(arrangement) => arrangement,
            Err(rejections) => {
                for rejection in rejections {
                    sink.stage_issue(Stage::ShuffleQuality, rejection);
                }
                return Err(AppError::quality_too_low(
                    ctx.questions.len(),
                    QUESTIONS_PER_UNIT,
                    "洗牌质量检查未通过",
                ));
            }
        };

        for rejection in &arrangement.rejections {
            sink.stage_issue(Stage::ShuffleQuality, rejection.clone());
        }

        let by_position: Vec<usize> = arrangement.order.iter().map(|&i| ctx.positions[i]).collect();
        let leaked = shuffle::predictability(&by_position);

        let questions: Vec<Question> = arrangement.order.iter().map(|&i| ctx.questions[i].clone()).collect();
        ctx.questions = questions;
        ctx.positions = by_position;
        ctx.quality_score = (arrangement.quality_score() + (1.0 - leaked)) / 2.0;

        debug!(
            "{} 洗牌完成: 尝试 {} 次, 可预测度 {:.2}",
            ctx, arrangement.attempts, arrangement.predictability
        );
        Ok(())
    }

    /// 阶段 7：打包
    fn package_unit(&self, ctx: &AssemblyCtx) -> AppResult<ContentUnit> {
        let boundary_level = boundary(ctx)?.level;
        ContentUnit::new(
            ctx.questions.clone(),
            UnitMeta {
                concept_code: ctx.concept.code.clone(),
                boundary_level,
                learner_id: ctx.learner_id.clone(),
                slot: ctx.slot,
                quality_score: ctx.quality_score,
                process_id: ctx.process_id,
                preparation_started_at: ctx.started_at,
                assembled_at: Utc::now(),
            },
        )
    }
}

fn boundary(ctx: &AssemblyCtx) -> AppResult<&BoundaryProfile> {
    ctx.boundary.as_ref().ok_or_else(|| AppError::BoundaryAssessmentFailed {
        learner_id: ctx.learner_id.clone(),
        reason: "边界评估结果缺失".to_string(),
    })
}

/// 阶段之间的取消检查点
fn checkpoint(ctx: &AssemblyCtx, token: &CancellationToken) -> AppResult<()> {
    if token.is_cancelled() {
        return Err(AppError::PreparationCancelled {
            process_id: ctx.process_id,
        });
    }
    Ok(())
}

/// 外部调用与取消信号竞争
async fn cancellable<T>(
    ctx: &AssemblyCtx,
    token: &CancellationToken,
    call: impl Future<Output = T>,
) -> AppResult<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AppError::PreparationCancelled { process_id: ctx.process_id }),
        output = call => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::{ConceptDescriptor, Fact};
    use crate::models::process::ProcessId;
    use crate::models::slot::SlotId;
    use crate::services::{InMemoryFactCatalog, NumericDistractorGenerator, StaticMasteryService};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingProgress {
        fn stage_started(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start:{}", stage));
        }
        fn stage_progress(&self, _stage: Stage, _within_stage: f64) {}
        fn stage_finished(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("finish:{}", stage));
        }
        fn stage_issue(&self, stage: Stage, message: String) {
            self.events.lock().unwrap().push(format!("issue:{}:{}", stage, message));
        }
    }

    fn flow_with(catalog: InMemoryFactCatalog) -> AssemblyFlow {
        AssemblyFlow::new(
            Arc::new(catalog),
            Arc::new(StaticMasteryService::new(4)),
            Arc::new(NumericDistractorGenerator::default()),
            PipelineConfig::default(),
        )
    }

    fn ctx(concept: ConceptDescriptor) -> AssemblyCtx {
        AssemblyCtx::new(ProcessId::new(), "learner-1", SlotId::A, concept, Utc::now())
    }

    #[tokio::test]
    async fn test_full_flow_builds_twenty_questions() {
        let flow = flow_with(InMemoryFactCatalog::multiplication_tables());
        let mut ctx = ctx(ConceptDescriptor::new("times_tables"));
        let progress = RecordingProgress::default();

        let unit = flow
            .run(&mut ctx, &progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(unit.len(), QUESTIONS_PER_UNIT);
        assert_eq!(unit.boundary_level, 4);
        for question in unit.questions() {
            assert_ne!(question.correct_answer, question.distractor);
            assert!(question.text.ends_with("= ?"));
        }
        for pair in unit.questions().windows(2) {
            assert_ne!(pair[0].meta.fact_family, pair[1].meta.fact_family);
        }

        let events = progress.events.lock().unwrap();
        assert_eq!(events.first().unwrap(), "start:fact_selection");
        assert_eq!(events.last().unwrap(), "start:unit_assembly");
    }

    #[tokio::test]
    async fn test_recently_seen_facts_are_excluded() {
        let facts: Vec<Fact> = (0..25)
            .map(|i| Fact::new(format!("f{}", i), format!("{} × 1", i), i.to_string()))
            .collect();
        let flow = flow_with(InMemoryFactCatalog::new().with_concept("ones", facts));

        let mut ctx = ctx(ConceptDescriptor::new("ones"))
            .with_recently_seen((0..6).map(|i| format!("f{}", i)));
        let err = flow
            .run(&mut ctx, &NoopProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INSUFFICIENT_FACTS");
        assert_eq!(err.stage(), Some(Stage::FactSelection));
    }

    #[tokio::test]
    async fn test_formatting_rejections_exhaust_candidates() {
        let mut facts: Vec<Fact> = (0..20)
            .map(|i| Fact::new(format!("f{}", i), format!("{} × 1", i), i.to_string()))
            .collect();
        facts[3].statement = "3 × 1; 1 × 3".to_string();
        let flow = flow_with(InMemoryFactCatalog::new().with_concept("ones", facts));
        let progress = RecordingProgress::default();

        let mut ctx = ctx(ConceptDescriptor::new("ones"));
        let err = flow
            .run(&mut ctx, &progress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "ASSEMBLY_QUALITY_TOO_LOW");
        assert_eq!(err.stage(), Some(Stage::QuestionFormatting));
        assert!(progress
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.starts_with("issue:question_formatting:事实 f3")));
    }

    #[tokio::test]
    async fn test_single_family_cannot_be_spread() {
        let facts: Vec<Fact> = (1..=20)
            .map(|i| Fact::new(format!("t{}", i), format!("{} × 2", i), (2 * i).to_string()).with_family("twos"))
            .collect();
        let flow = flow_with(InMemoryFactCatalog::new().with_concept("twos", facts));
        let progress = RecordingProgress::default();

        let mut ctx = ctx(ConceptDescriptor::new("twos"));
        let err = flow
            .run(&mut ctx, &progress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "ASSEMBLY_QUALITY_TOO_LOW");
        assert_eq!(err.stage(), Some(Stage::ShuffleQuality));
        let events = progress.events.lock().unwrap();
        assert!(events.iter().any(|e| e == "finish:question_assembly"));
        assert!(events.iter().any(|e| e.starts_with("issue:shuffle_quality:")));
        assert!(!events.iter().any(|e| e == "start:unit_assembly"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_stage() {
        let flow = flow_with(InMemoryFactCatalog::multiplication_tables());
        let mut ctx = ctx(ConceptDescriptor::new("times_tables"));
        let progress = RecordingProgress::default();
        let token = CancellationToken::new();
        token.cancel();

        let err = flow.run(&mut ctx, &progress, &token).await.unwrap_err();
        assert_eq!(err.code(), "PREPARATION_CANCELLED");
        assert!(progress.events.lock().unwrap().is_empty());
    }
}
