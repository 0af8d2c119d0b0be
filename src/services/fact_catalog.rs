//! 事实目录服务 - 业务能力层
//!
//! 只负责"按概念查事实"能力，不关心学习者和流程

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::models::content::{ConceptDescriptor, Fact};
use crate::models::loaders::{load_fact_catalog, FactCatalogFile};

/// 事实目录
#[async_trait]
pub trait FactCatalog: Send + Sync {
    /// 查询某个概念下的全部事实
    async fn query(&self, concept: &ConceptDescriptor) -> Result<Vec<Fact>>;
}

/// 内存事实目录
///
/// 按概念代码分组保存事实；未知概念返回空列表。
#[derive(Debug, Default)]
pub struct InMemoryFactCatalog {
    facts: RwLock<HashMap<String, Vec<Fact>>>,
}

impl InMemoryFactCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个概念的事实（覆盖同名概念）
    pub fn with_concept(self, code: impl Into<String>, facts: Vec<Fact>) -> Self {
        self.insert(code, facts);
        self
    }

    pub fn insert(&self, code: impl Into<String>, facts: Vec<Fact>) {
        self.facts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.into(), facts);
    }

    /// 概念数量
    pub fn concept_count(&self) -> usize {
        self.facts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn from_catalog_file(file: FactCatalogFile) -> Self {
        let catalog = Self::new();
        for concept in file.concepts {
            catalog.insert(concept.code, concept.facts);
        }
        catalog
    }

    /// 从 TOML 文件加载
    pub async fn from_toml_file(path: &Path) -> Result<Self> {
        let file = load_fact_catalog(path).await?;
        Ok(Self::from_catalog_file(file))
    }

    /// 内置的乘法表目录（概念代码 `times_tables`）
    ///
    /// `a × b` 与 `b × a` 属于同一事实族。
    pub fn multiplication_tables() -> Self {
        let mut facts = Vec::new();
        for a in 2..=12u32 {
            for b in 2..=12u32 {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                facts.push(
                    Fact::new(format!("{}x{}", a, b), format!("{} × {}", a, b), (a * b).to_string())
                        .with_family(format!("{}*{}", lo, hi)),
                );
            }
        }
        Self::new().with_concept("times_tables", facts)
    }
}

#[async_trait]
impl FactCatalog for InMemoryFactCatalog {
    async fn query(&self, concept: &ConceptDescriptor) -> Result<Vec<Fact>> {
        let facts = self
            .facts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&concept.code)
            .cloned()
            .unwrap_or_default();

        debug!("事实目录查询: 概念 {} 返回 {} 条", concept.code, facts.len());
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multiplication_tables() {
        let catalog = InMemoryFactCatalog::multiplication_tables();
        let facts = catalog
            .query(&ConceptDescriptor::new("times_tables"))
            .await
            .unwrap();

        assert_eq!(facts.len(), 121);
        let seven_eight = facts.iter().find(|f| f.id == "7x8").unwrap();
        let eight_seven = facts.iter().find(|f| f.id == "8x7").unwrap();
        assert_eq!(seven_eight.answer, "56");
        assert_eq!(seven_eight.family_key(), eight_seven.family_key());
    }

    #[tokio::test]
    async fn test_unknown_concept_is_empty() {
        let catalog = InMemoryFactCatalog::multiplication_tables();
        let facts = catalog.query(&ConceptDescriptor::new("fractions")).await.unwrap();
        assert!(facts.is_empty());
    }
}
