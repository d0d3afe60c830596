//! 决策服务的输入与输出

use serde::{Deserialize, Serialize};

use crate::models::option::ExtractedOption;
use crate::models::pattern::StepAction;

/// 决策服务返回的选项（尚未绑定型号）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleOption {
    pub category: String,
    pub component: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl OracleOption {
    pub fn into_extracted(self, model_context: &str) -> ExtractedOption {
        ExtractedOption {
            category: self.category,
            component: self.component,
            price: self.price,
            model_context: model_context.to_string(),
            image_ref: self.image_ref,
        }
    }
}

/// 决策服务对当前页面的判断
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleGuidance {
    /// 当前步骤名（如 "Interior"）
    pub step_name: Option<String>,
    pub new_options: Vec<OracleOption>,
    pub recommended_action: Option<StepAction>,
    /// 配置流程是否已经结束
    pub complete: bool,
}

/// 交给决策服务的会话上下文
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub site_domain: String,
    pub model_name: String,
    pub iteration: u32,
    pub step_index: u32,
    /// 最近发现的选项，避免重复汇报
    pub recent_options: Vec<ExtractedOption>,
}
