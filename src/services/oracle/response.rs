//! 决策响应解析
//!
//! LLM 输出经常带代码块、前后说明文字或多余逗号，先修复再反序列化；
//! 元素用采集时的下标引用，解析时转换为结构化选择器模式。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::OracleError;
use crate::models::{OracleGuidance, OracleOption, SelectorPattern, Snapshot, StepAction};

static TRAILING_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex"));

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGuidance {
    step_name: Option<String>,
    #[serde(alias = "options")]
    new_options: Vec<RawOption>,
    action: Option<RawAction>,
    #[serde(alias = "is_complete")]
    complete: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawOption {
    category: String,
    #[serde(alias = "name")]
    component: String,
    price: Option<serde_json::Value>,
    #[serde(alias = "image")]
    image_ref: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    option_index: Option<usize>,
    advance_index: Option<usize>,
}

/// 去掉代码块和 JSON 以外的文字，删除多余逗号
pub fn repair_json(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let body = &content[start..=end];
    Some(TRAILING_COMMA_RE.replace_all(body, "$1").into_owned())
}

fn price_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// 下标 → 带文本前缀的模式（只接受可操作的元素）
fn pattern_at(snapshot: &Snapshot, index: Option<usize>) -> Option<SelectorPattern> {
    let index = index?;
    match snapshot.elements.get(index) {
        Some(el) if el.is_actionable() => {
            Some(SelectorPattern::from_element(el).with_text_hint(&el.text))
        }
        Some(_) => {
            warn!("⚠️ 决策引用的元素 #{} 不可操作，忽略", index);
            None
        }
        None => {
            warn!("⚠️ 决策引用的元素 #{} 超出范围 (共 {} 个)", index, snapshot.elements.len());
            None
        }
    }
}

fn build_action(raw: RawAction, snapshot: &Snapshot) -> Option<StepAction> {
    let option = pattern_at(snapshot, raw.option_index);
    let advance = pattern_at(snapshot, raw.advance_index);
    match (raw.kind.trim().to_lowercase().as_str(), option, advance) {
        ("select_and_advance" | "select_and_continue", Some(option), Some(advance)) => {
            Some(StepAction::SelectAndAdvance { option, advance })
        }
        ("select" | "select_and_advance" | "select_and_continue", Some(option), _) => {
            Some(StepAction::Select { option })
        }
        ("advance" | "continue" | "select_and_advance" | "select_and_continue", _, Some(advance)) => {
            Some(StepAction::Advance { advance })
        }
        _ => None,
    }
}

/// 解析 LLM 文本为决策
pub fn parse_guidance(content: &str, snapshot: &Snapshot) -> Result<OracleGuidance, OracleError> {
    let json = repair_json(content).ok_or_else(|| OracleError::InvalidResponse {
        reason: format!("响应中没有 JSON 对象: {}", crate::utils::logging::truncate_text(content, 120)),
    })?;
    let raw: RawGuidance = serde_json::from_str(&json).map_err(|e| OracleError::InvalidResponse {
        reason: e.to_string(),
    })?;

    let new_options = raw
        .new_options
        .into_iter()
        .filter(|o| !o.component.trim().is_empty())
        .map(|o| OracleOption {
            category: if o.category.trim().is_empty() {
                "General".to_string()
            } else {
                o.category.trim().to_string()
            },
            component: o.component.trim().to_string(),
            price: o.price.and_then(price_to_string),
            image_ref: o.image_ref.filter(|s| !s.is_empty()),
        })
        .collect();

    let recommended_action = raw.action.and_then(|a| build_action(a, snapshot));

    Ok(OracleGuidance {
        step_name: raw.step_name.filter(|s| !s.trim().is_empty()),
        new_options,
        recommended_action,
        complete: raw.complete,
    })
}
