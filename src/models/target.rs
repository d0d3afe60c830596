use serde::{Deserialize, Serialize};

/// 未指定型号时使用的占位型号名
pub const DEFAULT_MODEL_NAME: &str = "default";

/// 一个待探索的配置器入口
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationTarget {
    pub url: String,
    /// 显示名称
    #[serde(default)]
    pub name: Option<String>,
    /// 需要逐个探索的型号，留空则只探索一次
    #[serde(default)]
    pub models: Vec<String>,
    /// 加载来源文件
    #[serde(skip)]
    pub file_path: Option<String>,
}

impl ExplorationTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            models: Vec::new(),
            file_path: None,
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn model_names(&self) -> Vec<String> {
        let models: Vec<String> = self
            .models
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            vec![DEFAULT_MODEL_NAME.to_string()]
        } else {
            models
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// 目标文件格式
///
/// ```toml
/// [[targets]]
/// url = "https://example.com/configure"
/// models = ["Model A", "Model B"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetFile {
    #[serde(default)]
    pub targets: Vec<ExplorationTarget>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_names_default() {
        let target = ExplorationTarget::new("https://example.com");
        assert_eq!(target.model_names(), vec![DEFAULT_MODEL_NAME.to_string()]);

        let target = target.with_models(["Model A", " ", "Model B "]);
        assert_eq!(target.model_names(), vec!["Model A", "Model B"]);
    }
}
