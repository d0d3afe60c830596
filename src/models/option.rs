use serde::{Deserialize, Serialize};

/// 一条抽取到的配置选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedOption {
    /// 选项所属类别（如 "Interior Wood"）
    pub category: String,
    /// 具体选项名
    pub component: String,
    #[serde(default)]
    pub price: Option<String>,
    /// 当前探索的型号
    pub model_context: String,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl ExtractedOption {
    /// 会话内去重键
    pub fn dedupe_key(&self) -> (String, String, String) {
        (
            self.category.trim().to_lowercase(),
            self.component.trim().to_lowercase(),
            self.model_context.trim().to_lowercase(),
        )
    }
}
