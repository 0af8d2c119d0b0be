use std::path::Path;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::Duration;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 缓存配置 ---
    /// 内容单元写入后多久过期（秒）
    pub unit_ttl_secs: u64,
    /// 按年龄失效时的最大缓存年龄（秒）
    pub max_cache_age_secs: u64,
    /// 同时保留的学习者数量上限
    pub max_learners: usize,
    // --- 流水线配置 ---
    /// 同时运行的非紧急准备数量
    pub max_concurrent_preparations: usize,
    /// 限时准备的默认期限（毫秒）
    pub default_deadline_ms: u64,
    /// 限时准备的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 终态进程保留时间（秒）
    pub process_retention_secs: u64,
    /// 排除的近期事实数量
    pub recent_fact_window: usize,
    /// 除 20 道之外额外保留的候选数量
    pub spare_questions: usize,
    /// 洗牌质量检查的最大尝试次数
    pub shuffle_attempts: usize,
    /// 可接受的最大顺序可预测度 [0, 1]
    pub max_predictability: f64,
    /// 题目文本的最大词数
    pub max_question_words: usize,
    // --- 运行配置 ---
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 默认日志过滤器
    pub log_filter: String,
    /// 事实目录文件
    pub fact_catalog_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unit_ttl_secs: 24 * 60 * 60,
            max_cache_age_secs: 24 * 60 * 60,
            max_learners: 10_000,
            max_concurrent_preparations: 4,
            default_deadline_ms: 3000,
            poll_interval_ms: 20,
            process_retention_secs: 600,
            recent_fact_window: 20,
            spare_questions: 4,
            shuffle_attempts: 8,
            max_predictability: 0.3,
            max_question_words: 24,
            verbose_logging: false,
            log_filter: "info".to_string(),
            fact_catalog_path: "facts.toml".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            unit_ttl_secs: env_or("UNIT_TTL_SECS", default.unit_ttl_secs),
            max_cache_age_secs: env_or("MAX_CACHE_AGE_SECS", default.max_cache_age_secs),
            max_learners: env_or("MAX_LEARNERS", default.max_learners),
            max_concurrent_preparations: env_or("MAX_CONCURRENT_PREPARATIONS", default.max_concurrent_preparations),
            default_deadline_ms: env_or("DEFAULT_DEADLINE_MS", default.default_deadline_ms),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", default.poll_interval_ms),
            process_retention_secs: env_or("PROCESS_RETENTION_SECS", default.process_retention_secs),
            recent_fact_window: env_or("RECENT_FACT_WINDOW", default.recent_fact_window),
            spare_questions: env_or("SPARE_QUESTIONS", default.spare_questions),
            shuffle_attempts: env_or("SHUFFLE_ATTEMPTS", default.shuffle_attempts),
            max_predictability: env_or("MAX_PREDICTABILITY", default.max_predictability),
            max_question_words: env_or("MAX_QUESTION_WORDS", default.max_question_words),
            verbose_logging: env_or("VERBOSE_LOGGING", default.verbose_logging),
            log_filter: std::env::var("LOG_FILTER").unwrap_or(default.log_filter),
            fact_catalog_path: std::env::var("FACT_CATALOG_PATH").unwrap_or(default.fact_catalog_path),
        }
    }

    /// 从 TOML 文件加载，缺失的字段使用默认值
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// 检查取值范围
    pub fn validate(&self) -> AppResult<()> {
        if self.default_deadline_ms == 0 {
            return Err(AppError::ConfigInvalid("default_deadline_ms 必须大于 0".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::ConfigInvalid("poll_interval_ms 必须大于 0".to_string()));
        }
        if self.max_concurrent_preparations == 0 {
            return Err(AppError::ConfigInvalid(
                "max_concurrent_preparations 必须大于 0".to_string(),
            ));
        }
        if self.max_learners == 0 {
            return Err(AppError::ConfigInvalid("max_learners 必须大于 0".to_string()));
        }
        if self.shuffle_attempts == 0 {
            return Err(AppError::ConfigInvalid("shuffle_attempts 必须大于 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.max_predictability) {
            return Err(AppError::ConfigInvalid(format!(
                "max_predictability 超出范围 [0, 1]: {}",
                self.max_predictability
            )));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            unit_ttl: Duration::seconds(self.unit_ttl_secs as i64),
            max_cache_age: Duration::seconds(self.max_cache_age_secs as i64),
            max_learners: self.max_learners,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_concurrent_preparations: self.max_concurrent_preparations,
            default_deadline: StdDuration::from_millis(self.default_deadline_ms),
            poll_interval: StdDuration::from_millis(self.poll_interval_ms),
            process_retention: Duration::seconds(self.process_retention_secs as i64),
            recent_fact_window: self.recent_fact_window,
            spare_questions: self.spare_questions,
            shuffle_attempts: self.shuffle_attempts,
            max_predictability: self.max_predictability,
            max_question_words: self.max_question_words,
        }
    }
}

fn env_or<T: std::str::FromStr>(var_name: &str, default: T) -> T {
    std::env::var(var_name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 缓存组件配置
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub unit_ttl: Duration,
    pub max_cache_age: Duration,
    pub max_learners: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Config::default().cache_config()
    }
}

/// 流水线组件配置
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_concurrent_preparations: usize,
    pub default_deadline: StdDuration,
    pub poll_interval: StdDuration,
    pub process_retention: Duration,
    pub recent_fact_window: usize,
    pub spare_questions: usize,
    pub shuffle_attempts: usize,
    pub max_predictability: f64,
    pub max_question_words: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Config::default().pipeline_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline_config().default_deadline, StdDuration::from_millis(3000));
        assert_eq!(config.cache_config().unit_ttl, Duration::hours(24));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("max_learners = 5\nverbose_logging = true").unwrap();
        assert_eq!(config.max_learners, 5);
        assert!(config.verbose_logging);
        assert_eq!(config.default_deadline_ms, 3000);
    }

    #[test]
    fn test_validate_rejects_bad_predictability() {
        let config = Config {
            max_predictability: 1.5,
            ..Config::default()
        };
        assert_eq!(config.validate().unwrap_err().code(), "CONFIG_INVALID");
    }
}
