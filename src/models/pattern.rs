//! 选择器模式与步骤动作

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::keywords;
use crate::models::page::{normalize_text, ElementDescriptor};

/// 文本前缀提示的最大长度（字符）
pub const TEXT_HINT_MAX_CHARS: usize = 40;

/// 结构化的元素定位模式
///
/// 只记录结构（标签 + 类名签名 + 角色）和可选的文本前缀，
/// 不记录具体选项的完整文字，保证可以跨型号复用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorPattern {
    pub tag: String,
    #[serde(default)]
    pub class_signature: Vec<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text_hint: Option<String>,
}

/// 角色优先，其次 input 类型
fn effective_role(el: &ElementDescriptor) -> Option<&str> {
    el.role.as_deref().or(el.input_type.as_deref())
}

impl SelectorPattern {
    /// 从元素提取结构模式（不带文本）
    pub fn from_element(el: &ElementDescriptor) -> Self {
        Self {
            tag: el.tag.to_lowercase(),
            class_signature: el.class_signature.clone(),
            role: effective_role(el).map(str::to_string),
            text_hint: None,
        }
    }

    pub fn with_text_hint(mut self, text: &str) -> Self {
        let normalized = normalize_text(text);
        self.text_hint = if normalized.is_empty() {
            None
        } else {
            Some(normalized.chars().take(TEXT_HINT_MAX_CHARS).collect())
        };
        self
    }

    pub fn without_text_hint(&self) -> Self {
        Self {
            text_hint: None,
            ..self.clone()
        }
    }

    pub fn matches(&self, el: &ElementDescriptor) -> bool {
        if !self.tag.eq_ignore_ascii_case(&el.tag) {
            return false;
        }
        if !self
            .class_signature
            .iter()
            .all(|c| el.class_signature.contains(c))
        {
            return false;
        }
        if let Some(role) = &self.role {
            if effective_role(el) != Some(role.as_str()) {
                return false;
            }
        }
        match &self.text_hint {
            Some(hint) => el.normalized_text().starts_with(hint.as_str()),
            None => true,
        }
    }

    /// 备用定位策略：先去掉文本提示，再去掉类名
    pub fn fallback(&self) -> Option<SelectorPattern> {
        if self.text_hint.is_some() {
            Some(self.without_text_hint())
        } else if !self.class_signature.is_empty() {
            Some(Self {
                class_signature: Vec::new(),
                ..self.clone()
            })
        } else {
            None
        }
    }

    /// 用于去重和存储的结构键
    pub fn structural_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.tag,
            self.class_signature.join("."),
            self.role.as_deref().unwrap_or_default(),
            self.text_hint.as_deref().unwrap_or_default()
        )
    }
}

impl fmt::Display for SelectorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)?;
        for class in &self.class_signature {
            write!(f, ".{}", class)?;
        }
        if let Some(role) = &self.role {
            write!(f, "[role={}]", role)?;
        }
        if let Some(hint) = &self.text_hint {
            write!(f, "(\"{}\")", hint)?;
        }
        Ok(())
    }
}

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Select,
    SelectAndAdvance,
    Advance,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Select => "select",
            ActionType::SelectAndAdvance => "select_and_advance",
            ActionType::Advance => "advance",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "select" => Ok(ActionType::Select),
            "select_and_advance" => Ok(ActionType::SelectAndAdvance),
            "advance" => Ok(ActionType::Advance),
            other => Err(format!("未知动作类型: {}", other)),
        }
    }
}

/// 一个步骤上执行的动作（封闭集合）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// 只选择选项（条件展开）
    Select { option: SelectorPattern },
    /// 选择选项后点击"继续"
    SelectAndAdvance {
        option: SelectorPattern,
        advance: SelectorPattern,
    },
    /// 只点击"继续"
    Advance { advance: SelectorPattern },
}

impl StepAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            StepAction::Select { .. } => ActionType::Select,
            StepAction::SelectAndAdvance { .. } => ActionType::SelectAndAdvance,
            StepAction::Advance { .. } => ActionType::Advance,
        }
    }

    pub fn option_pattern(&self) -> Option<&SelectorPattern> {
        match self {
            StepAction::Select { option } | StepAction::SelectAndAdvance { option, .. } => {
                Some(option)
            }
            StepAction::Advance { .. } => None,
        }
    }

    pub fn advance_pattern(&self) -> Option<&SelectorPattern> {
        match self {
            StepAction::SelectAndAdvance { advance, .. } | StepAction::Advance { advance } => {
                Some(advance)
            }
            StepAction::Select { .. } => None,
        }
    }

    /// 去掉具体选项文字，只保留结构和"继续"关键字前缀，可跨型号复用
    pub fn generalized(&self) -> StepAction {
        match self {
            StepAction::Select { option } => StepAction::Select {
                option: option.without_text_hint(),
            },
            StepAction::SelectAndAdvance { option, advance } => StepAction::SelectAndAdvance {
                option: option.without_text_hint(),
                advance: generalize_advance(advance),
            },
            StepAction::Advance { advance } => StepAction::Advance {
                advance: generalize_advance(advance),
            },
        }
    }

    /// 存储用的动作键
    pub fn action_key(&self) -> String {
        let option = self
            .option_pattern()
            .map(SelectorPattern::structural_key)
            .unwrap_or_default();
        let advance = self
            .advance_pattern()
            .map(SelectorPattern::structural_key)
            .unwrap_or_default();
        format!("{}#{}#{}", self.action_type().as_str(), option, advance)
    }
}

fn generalize_advance(pattern: &SelectorPattern) -> SelectorPattern {
    SelectorPattern {
        text_hint: pattern
            .text_hint
            .as_deref()
            .and_then(keywords::continue_hint),
        ..pattern.clone()
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Select { option } => write!(f, "选择 {}", option),
            StepAction::SelectAndAdvance { option, advance } => {
                write!(f, "选择 {} 后点击 {}", option, advance)
            }
            StepAction::Advance { advance } => write!(f, "点击 {}", advance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio(text: &str) -> ElementDescriptor {
        ElementDescriptor {
            tag: "label".into(),
            class_signature: vec!["model-card".into()],
            input_type: Some("radio".into()),
            text: text.into(),
            visible: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_pattern_matches_structure_and_prefix() {
        let pattern = SelectorPattern::from_element(&radio("Model A")).with_text_hint("Model A");
        assert!(pattern.matches(&radio("Model A - 2 person")));
        assert!(!pattern.matches(&radio("Model B")));
        assert!(pattern.without_text_hint().matches(&radio("Model B")));
    }

    #[test]
    fn test_fallback_chain() {
        let pattern = SelectorPattern::from_element(&radio("x")).with_text_hint("x");
        let first = pattern.fallback().unwrap();
        assert!(first.text_hint.is_none());
        let second = first.fallback().unwrap();
        assert!(second.class_signature.is_empty());
        assert!(second.fallback().is_none());
    }

    #[test]
    fn test_generalized_drops_option_text_keeps_continue_keyword() {
        let option = SelectorPattern::from_element(&radio("Model A")).with_text_hint("Model A");
        let advance = SelectorPattern {
            tag: "button".into(),
            class_signature: vec!["btn-primary".into()],
            role: None,
            text_hint: Some("continue to interior".into()),
        };
        let action = StepAction::SelectAndAdvance { option, advance };
        let general = action.generalized();

        assert_eq!(general.option_pattern().unwrap().text_hint, None);
        assert_eq!(
            general.advance_pattern().unwrap().text_hint.as_deref(),
            Some("continue")
        );
        assert_eq!(general.action_type(), ActionType::SelectAndAdvance);
    }

    #[test]
    fn test_action_key_ignores_option_text_after_generalization() {
        let a = StepAction::Select {
            option: SelectorPattern::from_element(&radio("Model A")).with_text_hint("Model A"),
        };
        let b = StepAction::Select {
            option: SelectorPattern::from_element(&radio("Model B")).with_text_hint("Model B"),
        };
        assert_ne!(a.action_key(), b.action_key());
        assert_eq!(a.generalized().action_key(), b.generalized().action_key());
    }

    #[test]
    fn test_display() {
        let pattern = SelectorPattern::from_element(&radio("Model A")).with_text_hint("Model A");
        assert_eq!(pattern.to_string(), "label.model-card[role=radio](\"model a\")");
    }
}
