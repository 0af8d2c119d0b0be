use crate::models::content::Fact;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 事实目录文件中的一个概念
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptFacts {
    pub code: String,
    #[serde(default)]
    pub facts: Vec<Fact>,
}

/// 事实目录文件
///
/// ```toml
/// [[concepts]]
/// code = "times_tables"
///
/// [[concepts.facts]]
/// id = "7x8"
/// statement = "7 × 8"
/// answer = "56"
/// family = "7*8"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactCatalogFile {
    #[serde(default)]
    pub concepts: Vec<ConceptFacts>,
    #[serde(skip_serializing, skip_deserializing)]
    pub file_path: Option<String>,
}

/// 从 TOML 文件加载事实目录
pub async fn load_fact_catalog(toml_file_path: &Path) -> Result<FactCatalogFile> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut catalog = parse_fact_catalog(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    catalog.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(catalog)
}

/// 从字符串解析事实目录
pub fn parse_fact_catalog(content: &str) -> Result<FactCatalogFile> {
    let catalog: FactCatalogFile = toml::from_str(content)?;
    Ok(catalog)
}

/// 从文件夹中加载所有事实目录文件
pub async fn load_all_catalog_files(folder_path: &str) -> Result<Vec<FactCatalogFile>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut catalogs = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            tracing::info!(
                "正在加载: {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );

            match load_fact_catalog(&path).await {
                Ok(catalog) => {
                    let fact_count: usize = catalog.concepts.iter().map(|c| c.facts.len()).sum();
                    tracing::info!("成功加载 {} 条事实", fact_count);
                    catalogs.push(catalog);
                }
                Err(e) => {
                    tracing::warn!("加载文件失败 {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(catalogs)
}
