use crate::models::target::{ExplorationTarget, TargetFile};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从单个 TOML 文件加载探索目标
pub async fn load_targets_file(toml_file_path: &Path) -> Result<Vec<ExplorationTarget>> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let file: TargetFile = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    let source = toml_file_path.to_string_lossy().to_string();
    Ok(file
        .targets
        .into_iter()
        .map(|mut t| {
            t.file_path = Some(source.clone());
            t
        })
        .collect())
}

/// 加载目标：可以是单个 TOML 文件，也可以是包含多个 TOML 文件的目录
pub async fn load_targets(path: &str) -> Result<Vec<ExplorationTarget>> {
    let path_buf = PathBuf::from(path);

    if !path_buf.exists() {
        anyhow::bail!("目标文件不存在: {}", path);
    }

    if path_buf.is_file() {
        return load_targets_file(&path_buf).await;
    }

    let mut toml_files = Vec::new();
    let mut entries = fs::read_dir(&path_buf)
        .await
        .with_context(|| format!("无法读取文件夹: {}", path))?;

    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        if file.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml_files.push(file);
        }
    }
    // 目录遍历顺序不稳定
    toml_files.sort();

    let mut targets = Vec::new();
    for file in toml_files {
        tracing::info!(
            "正在加载: {}",
            file.file_name().unwrap_or_default().to_string_lossy()
        );
        match load_targets_file(&file).await {
            Ok(loaded) => {
                tracing::info!("成功加载 {} 个目标", loaded.len());
                targets.extend(loaded);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", file.display(), e);
            }
        }
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_targets_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.toml"),
            "[[targets]]\nurl = \"https://a.example.com\"\nmodels = [\"X\", \"Y\"]\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.toml"),
            "[[targets]]\nurl = \"https://b.example.com\"\nname = \"B\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "not = [valid").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let targets = load_targets(dir.path().to_str().unwrap()).await.unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].models, vec!["X", "Y"]);
        assert_eq!(targets[1].display_name(), "B");
        assert!(targets[0].file_path.as_deref().unwrap().ends_with("a.toml"));
    }

    #[tokio::test]
    async fn test_load_targets_missing_path() {
        assert!(load_targets("/definitely/not/here.toml").await.is_err());
    }
}
