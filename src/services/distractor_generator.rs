//! 干扰项生成服务 - 业务能力层
//!
//! 只负责"为单道题生成一个错误答案"能力

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::content::ConceptDescriptor;

/// 干扰项难度区间，取值 [0, 1]，越大越接近正确答案
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyRange {
    pub min: f64,
    pub max: f64,
}

impl DifficultyRange {
    pub fn new(min: f64, max: f64) -> Self {
        let min = min.clamp(0.0, 1.0);
        let max = max.clamp(0.0, 1.0);
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// 干扰项生成请求
#[derive(Debug, Clone)]
pub struct DistractorRequest {
    pub correct_answer: String,
    pub difficulty: DifficultyRange,
    /// 本批次已选用的干扰项，应避免重复
    pub avoid_patterns: Vec<String>,
    pub concept: ConceptDescriptor,
}

/// 干扰项生成器
#[async_trait]
pub trait DistractorGenerator: Send + Sync {
    async fn generate(&self, request: DistractorRequest) -> Result<String>;
}

/// 数值干扰项生成器
///
/// 难度越低，干扰项离正确答案越远；已用过的值会被跳过。
#[derive(Debug, Clone)]
pub struct NumericDistractorGenerator {
    max_spread: i64,
}

impl NumericDistractorGenerator {
    pub fn new(max_spread: i64) -> Self {
        Self {
            max_spread: max_spread.max(1),
        }
    }

    /// 按难度计算首选偏移量
    fn preferred_offset(&self, difficulty: DifficultyRange) -> i64 {
        let spread = ((1.0 - difficulty.midpoint()) * self.max_spread as f64).round() as i64;
        spread.clamp(1, self.max_spread)
    }

    /// 候选偏移：先首选偏移，再向内收缩，最后向外扩展
    fn candidate_offsets(&self, preferred: i64, positive_first: bool) -> Vec<i64> {
        let inward = (1..=preferred).rev();
        let outward = (preferred + 1)..=(preferred + self.max_spread * 4);

        inward
            .chain(outward)
            .flat_map(|m| if positive_first { [m, -m] } else { [-m, m] })
            .collect()
    }
}

impl Default for NumericDistractorGenerator {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl DistractorGenerator for NumericDistractorGenerator {
    async fn generate(&self, request: DistractorRequest) -> Result<String> {
        let answer: i64 = request
            .correct_answer
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("答案不是整数 '{}': {}", request.correct_answer, e))?;

        let avoid: HashSet<&str> = request.avoid_patterns.iter().map(|s| s.as_str()).collect();
        let preferred = self.preferred_offset(request.difficulty);
        let positive_first = answer % 2 == 0;

        for offset in self.candidate_offsets(preferred, positive_first) {
            let candidate = answer + offset;
            if answer >= 0 && candidate < 0 {
                continue;
            }
            let text = candidate.to_string();
            if avoid.contains(text.as_str()) {
                continue;
            }
            debug!(
                "干扰项: 概念 {} 答案 {} → {} (偏移 {})",
                request.concept.code, answer, text, offset
            );
            return Ok(text);
        }

        anyhow::bail!("无法为答案 {} 生成未使用过的干扰项", answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(answer: &str, difficulty: DifficultyRange, avoid: &[&str]) -> DistractorRequest {
        DistractorRequest {
            correct_answer: answer.to_string(),
            difficulty,
            avoid_patterns: avoid.iter().map(|s| s.to_string()).collect(),
            concept: ConceptDescriptor::new("times_tables"),
        }
    }

    #[tokio::test]
    async fn test_harder_means_closer() {
        let generator = NumericDistractorGenerator::default();

        let easy = generator
            .generate(request("56", DifficultyRange::new(0.0, 0.2), &[]))
            .await
            .unwrap();
        let hard = generator
            .generate(request("56", DifficultyRange::new(0.9, 1.0), &[]))
            .await
            .unwrap();

        let easy_gap = (easy.parse::<i64>().unwrap() - 56).abs();
        let hard_gap = (hard.parse::<i64>().unwrap() - 56).abs();
        assert!(easy_gap > hard_gap);
        assert_eq!(hard_gap, 1);
    }

    #[tokio::test]
    async fn test_avoids_used_values() {
        let generator = NumericDistractorGenerator::default();
        let range = DifficultyRange::new(0.9, 1.0);

        let distractor = generator
            .generate(request("10", range, &["11", "9"]))
            .await
            .unwrap();
        assert_ne!(distractor, "10");
        assert_ne!(distractor, "11");
        assert_ne!(distractor, "9");
    }

    #[tokio::test]
    async fn test_never_negative_for_small_answers() {
        let generator = NumericDistractorGenerator::default();
        let distractor = generator
            .generate(request("1", DifficultyRange::new(0.0, 0.0), &[]))
            .await
            .unwrap();
        assert!(distractor.parse::<i64>().unwrap() >= 0);
    }

    #[tokio::test]
    async fn test_non_numeric_answer_fails() {
        let generator = NumericDistractorGenerator::default();
        let result = generator
            .generate(request("Paris", DifficultyRange::new(0.5, 0.5), &[]))
            .await;
        assert!(result.is_err());
    }
}
