use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cache::CacheMetricsSnapshot;
use crate::config::Config;
use crate::orchestrator::BatchProgress;

/// 初始化 tracing 订阅者
///
/// 优先使用 `RUST_LOG`；否则使用配置中的过滤规则，`verbose_logging` 时为 `debug`。
/// 重复初始化会返回错误，调用方可以忽略。
pub fn init_tracing(config: &Config) -> Result<()> {
    let fallback = if config.verbose_logging {
        "debug"
    } else {
        config.log_filter.as_str()
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("日志初始化失败: {}", e))
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 三槽位轮转题库缓存");
    info!("📊 最大并发准备数: {}", config.max_concurrent_preparations);
    info!("⏱️ 默认限时: {}ms", config.default_deadline_ms);
    info!("🗂️ 单元有效期: {}s", config.unit_ttl_secs);
    info!("{}", "=".repeat(60));
}

/// 记录批量准备进度
///
/// # 参数
/// - `learner_id`: 学习者
/// - `progress`: 批量进度汇总
pub fn log_batch_progress(learner_id: &str, progress: &BatchProgress) {
    info!(
        "[学习者 {}] 📦 批量准备 {:.0}% (完成 {}, 失败 {}, 取消 {}, 进行中 {})",
        learner_id,
        progress.overall * 100.0,
        progress.completed,
        progress.failed,
        progress.cancelled,
        progress.running
    );
}

/// 打印最终统计信息
pub fn print_final_stats(metrics: &CacheMetricsSnapshot) {
    info!("\n{}", "=".repeat(60));
    info!("📊 缓存统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 命中: {} (命中率 {:.1}%)", metrics.hit_count, metrics.hit_rate * 100.0);
    info!("❌ 未命中: {} (其中过期 {})", metrics.miss_count, metrics.expired_count);
    info!(
        "🛠️ 后台准备成功率: {:.1}%, 平均耗时 {}ms",
        metrics.background_success_rate * 100.0,
        metrics.avg_preparation_time.as_millis()
    );
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
