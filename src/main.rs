use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rotating_question_cache::cache::RotatingCache;
use rotating_question_cache::config::Config;
use rotating_question_cache::models::{load_all_catalog_files, ConceptDescriptor, SlotId};
use rotating_question_cache::orchestrator::AssemblyPipeline;
use rotating_question_cache::services::{InMemoryFactCatalog, NumericDistractorGenerator, StaticMasteryService};
use rotating_question_cache::utils::logging;
use tracing::{info, warn};

const DEMO_LEARNER: &str = "demo-learner";
const DEMO_CONCEPT: &str = "times_tables";

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config_path = Path::new("config.toml");
    let config = if config_path.exists() {
        Config::from_toml_file(config_path)?
    } else {
        let config = Config::from_env();
        config.validate()?;
        config
    };

    // 初始化日志
    logging::init_tracing(&config)?;
    logging::log_startup(&config);

    let catalog = Arc::new(load_catalog(&config).await.context("加载事实目录失败")?);
    let cache = Arc::new(RotatingCache::new(config.cache_config()));
    let pipeline = AssemblyPipeline::new(
        Arc::clone(&cache),
        catalog,
        Arc::new(StaticMasteryService::new(3)),
        Arc::new(NumericDistractorGenerator::default()),
        config.pipeline_config(),
    );

    cache.preload(DEMO_LEARNER);
    let concept = ConceptDescriptor::new(DEMO_CONCEPT);

    // 可选参数：起始消费槽位，如 `b` 或 `2`
    if let Some(arg) = std::env::args().nth(1) {
        let start = SlotId::parse(&arg)?;
        cache.rotate(DEMO_LEARNER, start)?;
    }
    let live = cache.live_slot(DEMO_LEARNER)?;

    // 正在消费的槽位：限时准备
    match pipeline
        .prepare_with_deadline(DEMO_LEARNER, live, concept.clone(), None)
        .await
    {
        Ok(unit) => {
            info!("✓ 槽位 {} 就绪: {} 道题", live, unit.len());
            for question in unit.questions().iter().take(3) {
                info!(
                    "  {} (答案 {}, 干扰项 {})",
                    logging::truncate_text(&question.text, 40),
                    question.correct_answer,
                    question.distractor
                );
            }
        }
        Err(e) if e.is_recoverable() => warn!("⚠️ 槽位 {} 暂未就绪: {}", live, e),
        Err(e) => return Err(e.into()),
    }

    // 其余槽位：后台准备
    let handle = pipeline.refill(DEMO_LEARNER, concept)?;
    loop {
        let progress = pipeline.batch_progress(&handle);
        logging::log_batch_progress(DEMO_LEARNER, &progress);
        if progress.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let next = cache.advance(DEMO_LEARNER)?;
    match cache.get(DEMO_LEARNER, next) {
        Ok(unit) => info!("✓ 轮转到槽位 {}: {} 道题即时可用", next, unit.len()),
        Err(e) => warn!("⚠️ 轮转到槽位 {} 后未命中: {}", next, e),
    }

    let state = cache.snapshot(DEMO_LEARNER)?;
    for slot in SlotId::ALL {
        let slot_state = state.slot(slot);
        info!(
            "  槽位 {}{}: {}",
            slot,
            if slot == state.live_slot { " (消费中)" } else { "" },
            slot_state
                .unit
                .as_ref()
                .map(|unit| format!("{} 道题, 质量 {:.2}", unit.len(), unit.quality_score))
                .unwrap_or_else(|| "空".to_string())
        );
    }

    let metrics = cache.metrics();
    logging::print_final_stats(&metrics);
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    Ok(())
}

/// 加载事实目录：目录路径加载其中全部 TOML，文件路径加载单个文件，不存在时使用内置乘法表
async fn load_catalog(config: &Config) -> Result<InMemoryFactCatalog> {
    let path = Path::new(&config.fact_catalog_path);

    if path.is_dir() {
        let catalog = InMemoryFactCatalog::new();
        for file in load_all_catalog_files(&config.fact_catalog_path).await? {
            for concept in file.concepts {
                catalog.insert(concept.code, concept.facts);
            }
        }
        info!("📁 从 {} 加载 {} 个概念", path.display(), catalog.concept_count());
        return Ok(catalog);
    }

    if path.is_file() {
        let catalog = InMemoryFactCatalog::from_toml_file(path).await?;
        info!("📁 从 {} 加载 {} 个概念", path.display(), catalog.concept_count());
        return Ok(catalog);
    }

    info!("📁 未找到 {}，使用内置乘法表", path.display());
    Ok(InMemoryFactCatalog::multiplication_tables())
}
