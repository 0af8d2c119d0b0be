//! 组装流水线 - 编排层
//!
//! ## 职责
//!
//! 1. **进程登记**：为每次准备分配 `ProcessId`，保证同一 (学习者, 槽位) 最多一个进行中的准备
//! 2. **并发控制**：使用 Semaphore 限制同时运行的准备数量，紧急请求绕过限制
//! 3. **后台执行**：tokio::spawn 运行 [`AssemblyFlow`]，panic 被捕获并转为失败
//! 4. **进度回报**：阶段进度同时写入进程记录和缓存槽位
//! 5. **交付**：成功后写入缓存，失败/取消时清理槽位上的准备标记；
//!    缓存拒绝的单元按 `UNIT_SUPERSEDED` 失败处理
//! 6. **限时准备**：轮询进程状态，超时后取消并返回 `PREPARATION_TIMEOUT`
//! 7. **学习者重置**：缓存被清除或重建后，旧的登记视为失效并被取消
//!
//! ## 锁顺序
//!
//! 登记表锁 → 缓存槽位锁。缓存从不回调流水线，因此不会反向加锁。

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::RotatingCache;
use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::models::content::{ConceptDescriptor, ContentUnit};
use crate::models::process::{BatchHandle, PreparationProcess, Priority, ProcessId, ProcessStatus, Stage};
use crate::models::slot::SlotId;
use crate::services::{DistractorGenerator, FactCatalog, MasteryService};
use crate::workflow::formatting;
use crate::workflow::{AssemblyCtx, AssemblyFlow, ProgressSink};

/// 没有历史数据时的预计准备耗时
const FALLBACK_PREPARATION_TIME: Duration = Duration::from_secs(2);

/// 一次准备请求
#[derive(Debug, Clone)]
pub struct PreparationRequest {
    pub learner_id: String,
    pub slot: SlotId,
    pub concept: ConceptDescriptor,
    pub priority: Priority,
}

impl PreparationRequest {
    pub fn new(learner_id: impl Into<String>, slot: SlotId, concept: ConceptDescriptor) -> Self {
        Self {
            learner_id: learner_id.into(),
            slot,
            concept,
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    fn validate(&self) -> AppResult<()> {
        if self.learner_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("learner_id 不能为空".to_string()));
        }
        if self.concept.code.trim().is_empty() {
            return Err(AppError::InvalidRequest("概念代码不能为空".to_string()));
        }
        if !formatting::is_known_template(&self.concept.template_id) {
            return Err(AppError::InvalidRequest(format!(
                "未知的题目模板: {}",
                self.concept.template_id
            )));
        }
        Ok(())
    }
}

/// 批量进度
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct BatchProgress {
    /// 子进程整体进度的平均值；已回收的进程按 1.0 计
    pub overall: f64,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub running: usize,
}

impl BatchProgress {
    pub fn is_finished(&self) -> bool {
        self.running == 0
    }
}

struct ProcessEntry {
    process: PreparationProcess,
    token: CancellationToken,
    unit: Option<Arc<ContentUnit>>,
    failure: Option<AppError>,
}

#[derive(Default)]
struct Registry {
    processes: HashMap<ProcessId, ProcessEntry>,
    /// (学习者, 槽位) → 进行中的进程
    active: HashMap<(String, SlotId), ProcessId>,
}

impl Registry {
    fn release(&mut self, learner_id: &str, slot: SlotId, id: ProcessId) {
        let key = (learner_id.to_string(), slot);
        if self.active.get(&key) == Some(&id) {
            self.active.remove(&key);
        }
    }
}

struct PipelineInner {
    cache: Arc<RotatingCache>,
    flow: AssemblyFlow,
    config: PipelineConfig,
    registry: Mutex<Registry>,
    permits: Arc<Semaphore>,
    /// 每个学习者最近交付过的事实
    recent_facts: Mutex<HashMap<String, VecDeque<String>>>,
}

/// 组装流水线
///
/// 可以廉价克隆，所有克隆共享同一份登记表。
#[derive(Clone)]
pub struct AssemblyPipeline {
    inner: Arc<PipelineInner>,
}

impl AssemblyPipeline {
    pub fn new(
        cache: Arc<RotatingCache>,
        catalog: Arc<dyn FactCatalog>,
        mastery: Arc<dyn MasteryService>,
        distractors: Arc<dyn DistractorGenerator>,
        config: PipelineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_preparations.max(1)));
        let flow = AssemblyFlow::new(catalog, mastery, distractors, config.clone());

        Self {
            inner: Arc::new(PipelineInner {
                cache,
                flow,
                config,
                registry: Mutex::new(Registry::default()),
                permits,
                recent_facts: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<RotatingCache> {
        &self.inner.cache
    }

    /// 启动一次后台准备，立即返回进程 ID
    pub fn prepare(&self, request: PreparationRequest) -> AppResult<ProcessId> {
        request.validate()?;
        self.purge_finished();

        let inner = &self.inner;
        let now = Utc::now();
        let key = (request.learner_id.clone(), request.slot);

        let mut registry = inner.registry();
        if let Some(&existing) = registry.active.get(&key) {
            if inner.cache.is_preparing(&request.learner_id, request.slot, existing) {
                return Err(AppError::AlreadyPreparing {
                    learner_id: request.learner_id,
                    slot: request.slot,
                    process_id: existing,
                });
            }
            // 缓存中已没有该准备的标记：学习者在准备期间被清除或重建
            if inner.abandon(&mut registry, existing).is_some() {
                warn!(
                    "[学习者 {}] ♻️ 槽位 {} 的旧准备已失效，取消进程 {}",
                    request.learner_id, request.slot, existing
                );
            }
        }

        let mut process = PreparationProcess::new(
            request.learner_id.as_str(),
            request.slot,
            request.concept.clone(),
            request.priority,
            now,
        );
        let id = process.id;
        let estimated = inner.estimate_completion(now);
        process.estimated_completion_at = Some(estimated);

        // 学习者不存在时在登记前失败
        inner
            .cache
            .begin_preparation(&request.learner_id, request.slot, id, Some(estimated))?;

        let token = CancellationToken::new();
        registry.processes.insert(
            id,
            ProcessEntry {
                process,
                token: token.clone(),
                unit: None,
                failure: None,
            },
        );
        registry.active.insert(key, id);
        drop(registry);

        let recently_seen = inner.recent_facts_for(&request.learner_id);
        let ctx = AssemblyCtx::new(id, request.learner_id, request.slot, request.concept, now)
            .with_recently_seen(recently_seen);

        info!(
            "{} 🚀 启动准备 (进程 {}, 优先级 {:?})",
            ctx, id, request.priority
        );

        let task_inner = Arc::clone(inner);
        tokio::spawn(run_supervised(task_inner, ctx, token, request.priority));

        Ok(id)
    }

    /// 查询进程状态
    pub fn progress(&self, process_id: ProcessId) -> AppResult<PreparationProcess> {
        self.inner
            .registry()
            .processes
            .get(&process_id)
            .map(|entry| entry.process.clone())
            .ok_or(AppError::ProcessNotFound { process_id })
    }

    /// 取消进程；对已终止的进程不做任何事
    pub fn cancel(&self, process_id: ProcessId) -> AppResult<()> {
        let inner = &self.inner;
        let mut registry = inner.registry();
        if !registry.processes.contains_key(&process_id) {
            return Err(AppError::ProcessNotFound { process_id });
        }

        if let Some((learner_id, slot)) = inner.abandon(&mut registry, process_id) {
            info!("[学习者 {}] 🛑 槽位 {} 的准备已取消 (进程 {})", learner_id, slot, process_id);
        }
        Ok(())
    }

    /// 清除学习者：取消其所有未结束的准备，移除缓存和最近事实记录
    ///
    /// 返回缓存中是否存在该学习者。
    pub fn clear_learner(&self, learner_id: &str) -> bool {
        let inner = &self.inner;
        let mut registry = inner.registry();
        let running: Vec<ProcessId> = registry
            .processes
            .iter()
            .filter(|(_, entry)| entry.process.learner_id == learner_id && !entry.process.is_terminal())
            .map(|(id, _)| *id)
            .collect();

        for id in &running {
            inner.abandon(&mut registry, *id);
        }
        let removed = inner.cache.clear(learner_id);
        drop(registry);

        inner.recent_facts().remove(learner_id);
        if !running.is_empty() {
            info!("[学习者 {}] 🛑 清除时取消了 {} 个准备", learner_id, running.len());
        }
        removed
    }

    /// 批量准备：逐个登记，被拒绝的请求记录在句柄中
    pub fn prepare_batch(&self, requests: Vec<PreparationRequest>) -> BatchHandle {
        let mut handle = BatchHandle::default();
        let total = requests.len();

        for (index, request) in requests.into_iter().enumerate() {
            match self.prepare(request) {
                Ok(id) => handle.process_ids.push(id),
                Err(e) => {
                    warn!("⚠️ 批量请求 {}/{} 被拒绝: {}", index + 1, total, e);
                    handle.rejected.push((index, e.code(), e.to_string()));
                }
            }
        }

        info!("📦 批量准备: 接受 {}/{}", handle.accepted(), total);
        handle
    }

    /// 汇总批量进度
    pub fn batch_progress(&self, handle: &BatchHandle) -> BatchProgress {
        let registry = self.inner.registry();
        let mut progress = BatchProgress::default();
        if handle.process_ids.is_empty() {
            progress.overall = 1.0;
            return progress;
        }

        let mut total = 0.0;
        for id in &handle.process_ids {
            let Some(entry) = registry.processes.get(id) else {
                total += 1.0;
                progress.completed += 1;
                continue;
            };
            total += entry.process.overall_progress;
            match entry.process.status {
                ProcessStatus::Completed => progress.completed += 1,
                ProcessStatus::Failed => progress.failed += 1,
                ProcessStatus::Cancelled => progress.cancelled += 1,
                ProcessStatus::Queued | ProcessStatus::InProgress => progress.running += 1,
            }
        }
        progress.overall = total / handle.process_ids.len() as f64;
        progress
    }

    /// 限时准备并返回内容单元
    ///
    /// 以紧急优先级启动；若该槽位已有准备在进行，则等待那次准备。
    /// 超时后只取消自己启动的准备。`deadline` 为 `None` 时使用配置的默认值。
    pub async fn prepare_with_deadline(
        &self,
        learner_id: &str,
        slot: SlotId,
        concept: ConceptDescriptor,
        deadline: Option<Duration>,
    ) -> AppResult<Arc<ContentUnit>> {
        let deadline = deadline.unwrap_or(self.inner.config.default_deadline);
        let request = PreparationRequest::new(learner_id, slot, concept).with_priority(Priority::Urgent);

        let (process_id, owned) = match self.prepare(request) {
            Ok(id) => (id, true),
            Err(AppError::AlreadyPreparing { process_id, .. }) => {
                debug!("[学习者 {}] 槽位 {} 已在准备中，等待进程 {}", learner_id, slot, process_id);
                (process_id, false)
            }
            Err(e) => return Err(e),
        };

        match tokio::time::timeout(deadline, self.wait_for(process_id)).await {
            Ok(result) => result,
            Err(_) => {
                if owned {
                    // 进程可能恰好在超时瞬间结束，此时取消是空操作
                    let _ = self.cancel(process_id);
                }
                let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    "[学习者 {}] ⏱️ 槽位 {} 的准备超过 {}ms 未完成",
                    learner_id, slot, deadline_ms
                );
                Err(AppError::PreparationTimeout { deadline_ms })
            }
        }
    }

    /// 为所有需要内容的槽位启动准备；正在消费的槽位使用紧急优先级
    pub fn refill(&self, learner_id: &str, concept: ConceptDescriptor) -> AppResult<BatchHandle> {
        let needs = self.inner.cache.needs_preparation(learner_id)?;

        let requests: Vec<PreparationRequest> = needs
            .slots_needing_work
            .iter()
            .filter(|slot| !needs.in_progress.contains(slot))
            .map(|&slot| {
                let priority = if needs.urgent_slots.contains(&slot) {
                    Priority::Urgent
                } else {
                    Priority::Normal
                };
                PreparationRequest::new(learner_id, slot, concept.clone()).with_priority(priority)
            })
            .collect();

        if requests.is_empty() {
            debug!("[学习者 {}] 所有槽位都已就绪或正在准备", learner_id);
            return Ok(BatchHandle::default());
        }
        Ok(self.prepare_batch(requests))
    }

    /// 回收超过保留期的已终止进程，返回回收数量
    pub fn purge_finished(&self) -> usize {
        let inner = &self.inner;
        let cutoff = Utc::now() - inner.config.process_retention;

        let purged = {
            let mut registry = inner.registry();
            let before = registry.processes.len();
            registry.processes.retain(|_, entry| {
                !(entry.process.is_terminal()
                    && entry.process.completed_at.is_some_and(|at| at <= cutoff))
            });
            before - registry.processes.len()
        };

        inner
            .recent_facts()
            .retain(|learner_id, _| inner.cache.contains(learner_id));

        if purged > 0 {
            debug!("♻️ 回收 {} 个已结束的准备进程", purged);
        }
        purged
    }

    /// 进行中的准备数量
    pub fn active_count(&self) -> usize {
        self.inner.registry().active.len()
    }

    /// 登记表中的进程数量（含已结束但未回收的）
    pub fn process_count(&self) -> usize {
        self.inner.registry().processes.len()
    }

    async fn wait_for(&self, process_id: ProcessId) -> AppResult<Arc<ContentUnit>> {
        let period = self.inner.config.poll_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let registry = self.inner.registry();
            let entry = registry
                .processes
                .get(&process_id)
                .ok_or(AppError::ProcessNotFound { process_id })?;

            match entry.process.status {
                ProcessStatus::Completed => {
                    if let Some(unit) = &entry.unit {
                        return Ok(Arc::clone(unit));
                    }
                }
                ProcessStatus::Failed => {
                    return Err(entry.failure.clone().unwrap_or_else(|| {
                        AppError::TaskAborted(entry.process.error.clone().unwrap_or_default())
                    }));
                }
                ProcessStatus::Cancelled => {
                    return Err(AppError::PreparationCancelled { process_id });
                }
                ProcessStatus::Queued | ProcessStatus::InProgress => {}
            }
        }
    }
}

impl PipelineInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recent_facts(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.recent_facts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recent_facts_for(&self, learner_id: &str) -> Vec<String> {
        self.recent_facts()
            .get(learner_id)
            .map(|seen| seen.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remember_facts(&self, unit: &ContentUnit) {
        let window = self.config.recent_fact_window;
        if window == 0 {
            return;
        }
        let mut recent = self.recent_facts();
        let seen = recent.entry(unit.learner_id.clone()).or_default();
        for question in unit.questions() {
            seen.push_back(question.meta.fact_id.clone());
        }
        while seen.len() > window {
            seen.pop_front();
        }
    }

    fn estimate_completion(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let expected = self
            .cache
            .avg_preparation_time()
            .unwrap_or(FALLBACK_PREPARATION_TIME);
        now + TimeDelta::from_std(expected).unwrap_or(TimeDelta::seconds(2))
    }

    /// 修改进程记录并返回最新的整体进度
    fn update(&self, id: ProcessId, f: impl FnOnce(&mut PreparationProcess)) -> Option<f64> {
        let mut registry = self.registry();
        let entry = registry.processes.get_mut(&id)?;
        f(&mut entry.process);
        Some(entry.process.overall_progress)
    }

    /// 标记取消、通知任务并释放槽位；进程不存在或已终止时返回 `None`
    fn abandon(&self, registry: &mut Registry, id: ProcessId) -> Option<(String, SlotId)> {
        let entry = registry.processes.get_mut(&id)?;
        if entry.process.is_terminal() {
            return None;
        }

        entry.process.mark_cancelled(Utc::now());
        entry.token.cancel();
        let learner_id = entry.process.learner_id.clone();
        let slot = entry.process.slot;

        registry.release(&learner_id, slot, id);
        self.cache.end_preparation(&learner_id, slot, id, false);
        Some((learner_id, slot))
    }

    fn mark_started(&self, id: ProcessId) -> bool {
        let mut registry = self.registry();
        let Some(entry) = registry.processes.get_mut(&id) else {
            return false;
        };
        if entry.process.is_terminal() {
            return false;
        }
        entry.process.status = ProcessStatus::InProgress;
        entry.process.started_at = Some(Utc::now());
        true
    }

    /// 处理流程的结果：写入缓存或记录失败
    fn finalize(&self, ctx: &AssemblyCtx, outcome: AppResult<ContentUnit>) {
        let id = ctx.process_id;
        let now = Utc::now();
        let mut registry = self.registry();
        let Some(entry) = registry.processes.get_mut(&id) else {
            return;
        };
        let cancelled = entry.process.status == ProcessStatus::Cancelled || entry.token.is_cancelled();

        match outcome {
            Ok(unit) if cancelled => {
                debug!("{} 进程 {} 已取消，丢弃组装结果 ({} 道题)", ctx, id, unit.len());
                entry.process.mark_cancelled(now);
                self.cache.end_preparation(&ctx.learner_id, ctx.slot, id, false);
            }
            Ok(unit) => {
                let unit = Arc::new(unit);
                match self.cache.store(Arc::clone(&unit)) {
                    Ok(receipt) if receipt.cached => {
                        entry.process.finish_stage(Stage::UnitAssembly, now);
                        entry.process.mark_completed(now);
                        entry.unit = Some(Arc::clone(&unit));
                        info!("{} ✅ 已写入缓存 (有效期至 {})", ctx, receipt.valid_until);
                        self.remember_facts(&unit);
                    }
                    Ok(receipt) => {
                        // 缓存已清除该准备的标记，无需 end_preparation
                        let e = AppError::UnitSuperseded {
                            learner_id: ctx.learner_id.clone(),
                            slot: ctx.slot,
                            reason: receipt.stale_reason.unwrap_or("单元已过时").to_string(),
                        }
                        .at_stage(Stage::UnitAssembly);
                        warn!("{} ⚠️ 单元未写入缓存: {}", ctx, e);
                        entry
                            .process
                            .mark_failed(e.stage(), format!("{}: {}", e.code(), e), now);
                        entry.failure = Some(e);
                    }
                    Err(e) => {
                        let e = e.at_stage(Stage::UnitAssembly);
                        error!("{} ❌ 写入缓存失败: {}", ctx, e);
                        entry
                            .process
                            .mark_failed(e.stage(), format!("{}: {}", e.code(), e), now);
                        entry.failure = Some(e);
                        self.cache.end_preparation(&ctx.learner_id, ctx.slot, id, true);
                    }
                }
            }
            Err(e) if cancelled || matches!(e.root(), AppError::PreparationCancelled { .. }) => {
                entry.process.mark_cancelled(now);
                debug!("{} 进程 {} 在阶段 {:?} 响应取消", ctx, id, e.stage());
                self.cache.end_preparation(&ctx.learner_id, ctx.slot, id, false);
            }
            Err(e) => {
                error!("{} ❌ 准备失败 [{}]: {}", ctx, e.code(), e);
                entry
                    .process
                    .mark_failed(e.stage(), format!("{}: {}", e.code(), e), now);
                entry.failure = Some(e);
                self.cache.end_preparation(&ctx.learner_id, ctx.slot, id, true);
            }
        }

        registry.release(&ctx.learner_id, ctx.slot, id);
    }
}

/// 阶段回报：写入进程记录，并同步到缓存槽位
struct ProcessReporter<'a> {
    inner: &'a PipelineInner,
    id: ProcessId,
    learner_id: &'a str,
    slot: SlotId,
}

impl ProcessReporter<'_> {
    fn report(&self, f: impl FnOnce(&mut PreparationProcess)) {
        if let Some(progress) = self.inner.update(self.id, f) {
            self.inner
                .cache
                .report_progress(self.learner_id, self.slot, self.id, progress);
        }
    }
}

impl ProgressSink for ProcessReporter<'_> {
    fn stage_started(&self, stage: Stage) {
        self.report(|process| process.begin_stage(stage, Utc::now()));
    }

    fn stage_progress(&self, stage: Stage, within_stage: f64) {
        self.report(|process| process.stage_progress(stage, within_stage));
    }

    fn stage_finished(&self, stage: Stage) {
        self.report(|process| process.finish_stage(stage, Utc::now()));
    }

    fn stage_issue(&self, stage: Stage, message: String) {
        self.inner.update(self.id, |process| process.note_stage_issue(stage, message));
    }
}

/// 后台任务：等待许可、运行流程、处理结果
async fn run_supervised(
    inner: Arc<PipelineInner>,
    mut ctx: AssemblyCtx,
    token: CancellationToken,
    priority: Priority,
) {
    let id = ctx.process_id;

    let _permit: Option<OwnedSemaphorePermit> = if priority == Priority::Urgent {
        None
    } else {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                inner.finalize(&ctx, Err(AppError::PreparationCancelled { process_id: id }));
                return;
            }
            permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(e) => {
                    inner.finalize(&ctx, Err(AppError::TaskAborted(format!("并发许可不可用: {}", e))));
                    return;
                }
            },
        }
    };

    if !inner.mark_started(id) {
        inner.finalize(&ctx, Err(AppError::PreparationCancelled { process_id: id }));
        return;
    }

    let learner_id = ctx.learner_id.clone();
    let reporter = ProcessReporter {
        inner: inner.as_ref(),
        id,
        learner_id: &learner_id,
        slot: ctx.slot,
    };

    let outcome = AssertUnwindSafe(inner.flow.run(&mut ctx, &reporter, &token))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "未知 panic".to_string());
            Err(AppError::TaskAborted(message))
        });

    inner.finalize(&ctx, outcome);
}
