//! 页面快照与页面状态

use serde::{Deserialize, Serialize};

use crate::models::pattern::SelectorPattern;

/// 记忆存储分配的状态 ID
pub type StateId = i64;

/// 视口坐标
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// 控件类别，决定撤销动作时的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Radio,
    Checkbox,
    Select,
    Button,
    Link,
    /// 带点击处理的自定义元素（卡片、色块等）
    Custom,
}

/// 单个元素的结构化描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementDescriptor {
    /// 小写标签名
    pub tag: String,
    /// 规范化后的类名签名（去掉工具类和状态类）
    pub class_signature: Vec<String>,
    pub role: Option<String>,
    /// `<input type=...>`
    pub input_type: Option<String>,
    pub text: String,
    pub visible: bool,
    pub disabled: bool,
    pub selected: bool,
    pub center: Point,
    /// 元素文本中的价格片段
    pub price_text: Option<String>,
    pub image_ref: Option<String>,
}

impl ElementDescriptor {
    /// 可见且未禁用
    pub fn is_actionable(&self) -> bool {
        self.visible && !self.disabled
    }

    pub fn has_price(&self) -> bool {
        self.price_text.is_some()
    }

    /// 小写、去首尾空白、合并连续空白
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }

    pub fn control_kind(&self) -> ControlKind {
        let role = self.role.as_deref().unwrap_or_default();
        let input_type = self.input_type.as_deref().unwrap_or_default();
        if input_type == "radio" || role == "radio" {
            ControlKind::Radio
        } else if input_type == "checkbox" || role == "checkbox" || role == "switch" {
            ControlKind::Checkbox
        } else if self.tag == "select" || role == "listbox" || role == "combobox" {
            ControlKind::Select
        } else if self.tag == "button" || role == "button" || input_type == "submit" {
            ControlKind::Button
        } else if self.tag == "a" || role == "link" {
            ControlKind::Link
        } else {
            ControlKind::Custom
        }
    }
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 一次页面采集的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub url: String,
    pub visible_text: String,
    pub elements: Vec<ElementDescriptor>,
    /// base64 编码的 PNG 截图
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl Snapshot {
    /// 可操作的元素（文档顺序）
    pub fn actionable(&self) -> impl Iterator<Item = &ElementDescriptor> {
        self.elements.iter().filter(|e| e.is_actionable())
    }

    /// 第一个匹配模式且可操作的元素
    pub fn find_matching(&self, pattern: &SelectorPattern) -> Option<&ElementDescriptor> {
        self.actionable().find(|e| pattern.matches(e))
    }

    pub fn visible_lines(&self) -> impl Iterator<Item = &str> {
        self.visible_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.visible_text.trim().is_empty()
    }
}

/// 记忆中的页面状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub id: StateId,
    pub site_domain: String,
    pub signature: String,
    pub model_context: String,
    pub step_index: u32,
    pub is_terminal: bool,
}
