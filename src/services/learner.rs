//! 工作流学习
//!
//! 把决策服务指导下的具体页面泛化成结构模式（标签 + 类名签名 + 角色），
//! 同一布局换一个型号时按模式直接执行，不再询问决策服务。
//!
//! 第一个型号配置完成后锁定：之后只读不写。

use tracing::{debug, info};

use crate::models::keywords::{continue_hint, is_continue_text, is_ignored_text};
use crate::models::page::normalize_text;
use crate::models::{
    ControlKind, ElementDescriptor, ExtractedOption, SelectorPattern, Snapshot, StepAction,
};

/// 元素在步骤中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    /// 继续/下一步
    Continue,
    /// 可选项
    Option,
    /// 导航、登录、社交链接等
    Navigation,
    /// 不可操作
    Inert,
}

/// 给元素分类
pub fn classify(el: &ElementDescriptor) -> ElementRole {
    if !el.is_actionable() {
        return ElementRole::Inert;
    }
    let text = el.normalized_text();
    if is_continue_text(&text) {
        return ElementRole::Continue;
    }
    if is_ignored_text(&text) || (el.control_kind() == ControlKind::Link && text.is_empty()) {
        return ElementRole::Navigation;
    }
    ElementRole::Option
}

/// "继续"按钮模式：结构 + 关键字前缀
pub fn continue_pattern(el: &ElementDescriptor) -> SelectorPattern {
    let mut pattern = SelectorPattern::from_element(el);
    pattern.text_hint = continue_hint(&el.normalized_text());
    pattern
}

/// 学到的一个步骤
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub step_index: u32,
    pub step_name: String,
    /// 按优先级排列，第一个是实际被选择过的选项
    pub option_patterns: Vec<SelectorPattern>,
    pub continue_patterns: Vec<SelectorPattern>,
}

fn push_unique_structure(patterns: &mut Vec<SelectorPattern>, pattern: SelectorPattern) {
    let exists = patterns
        .iter()
        .any(|p| p.tag == pattern.tag && p.class_signature == pattern.class_signature);
    if !exists {
        patterns.push(pattern);
    }
}

fn push_unique(patterns: &mut Vec<SelectorPattern>, pattern: SelectorPattern) {
    if !patterns.contains(&pattern) {
        patterns.push(pattern);
    }
}

/// 会话级工作流学习器
#[derive(Debug, Default)]
pub struct WorkflowLearner {
    steps: Vec<WorkflowStep>,
    /// 会话内所有步骤共享的"继续"模式
    continue_patterns: Vec<SelectorPattern>,
    locked: bool,
}

impl WorkflowLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// 锁定后不再学习（不可逆）
    pub fn lock(&mut self) {
        if !self.locked {
            info!("🔒 工作流已锁定: {} 个步骤", self.steps.len());
            self.locked = true;
        }
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn step(&self, step_index: u32) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_index == step_index)
    }

    pub fn has_step(&self, step_index: u32) -> bool {
        self.step(step_index).is_some()
    }

    /// 最后一个学到的步骤序号
    pub fn last_step_index(&self) -> Option<u32> {
        self.steps.iter().map(|s| s.step_index).max()
    }

    pub fn continue_patterns(&self) -> &[SelectorPattern] {
        &self.continue_patterns
    }

    /// 学习一个步骤；已锁定或已学过时返回 `false` 且不做任何修改
    pub fn learn(
        &mut self,
        step_index: u32,
        step_name: &str,
        snapshot: &Snapshot,
        observed: &StepAction,
    ) -> bool {
        if self.locked || self.has_step(step_index) {
            return false;
        }

        let mut option_patterns = Vec::new();
        let mut continue_patterns = Vec::new();

        // 实际执行过的动作优先
        if let Some(option) = observed.option_pattern() {
            push_unique_structure(&mut option_patterns, option.without_text_hint());
        }
        if let Some(advance) = observed.generalized().advance_pattern() {
            push_unique(&mut continue_patterns, advance.clone());
        }

        for el in snapshot.elements.iter() {
            match classify(el) {
                ElementRole::Continue => push_unique(&mut continue_patterns, continue_pattern(el)),
                ElementRole::Option => {
                    push_unique_structure(&mut option_patterns, SelectorPattern::from_element(el))
                }
                ElementRole::Navigation | ElementRole::Inert => {}
            }
        }

        for pattern in &continue_patterns {
            push_unique(&mut self.continue_patterns, pattern.clone());
        }

        let step_name = if step_name.trim().is_empty() {
            default_step_name(step_index)
        } else {
            step_name.trim().to_string()
        };
        debug!(
            "学习步骤 {} ({}): 选项模式 {} 个, 继续模式 {} 个",
            step_index,
            step_name,
            option_patterns.len(),
            continue_patterns.len()
        );
        self.steps.push(WorkflowStep {
            step_index,
            step_name,
            option_patterns,
            continue_patterns,
        });
        true
    }

    /// 按学到的选项模式直接从页面读出选项（回放时代替决策服务）
    pub fn extract_step_options(
        &self,
        step_index: u32,
        snapshot: &Snapshot,
        model_context: &str,
    ) -> Vec<ExtractedOption> {
        let Some(step) = self.step(step_index) else {
            return Vec::new();
        };
        options_matching(snapshot, &step.option_patterns, &step.step_name, model_context)
    }

    /// 按学到的步骤为当前页面生成动作
    ///
    /// 选项：第一个匹配学到的选项模式的可操作元素（有型号提示时优先文字匹配的元素）；
    /// 继续：第一个匹配本步骤或会话级继续模式的元素。
    pub fn plan_step(
        &self,
        step_index: u32,
        snapshot: &Snapshot,
        model_hint: Option<&str>,
    ) -> Option<StepAction> {
        let step = self.step(step_index)?;

        let option = step
            .option_patterns
            .iter()
            .find_map(|p| pick_element(snapshot, p, model_hint))
            .filter(|el| classify(el) == ElementRole::Option)
            .map(concrete_pattern);

        let advance = step
            .continue_patterns
            .iter()
            .chain(self.continue_patterns.iter())
            .find_map(|p| snapshot.find_matching(p))
            .map(concrete_pattern);

        match (option, advance) {
            (Some(option), Some(advance)) => Some(StepAction::SelectAndAdvance { option, advance }),
            (Some(option), None) => Some(StepAction::Select { option }),
            (None, Some(advance)) => Some(StepAction::Advance { advance }),
            (None, None) => None,
        }
    }
}

/// 没有步骤名时的类别名
pub fn default_step_name(step_index: u32) -> String {
    format!("step-{}", step_index)
}

/// 页面上匹配任一选项模式的选项（禁用的选项也算，只是当前不可选）
pub fn options_matching(
    snapshot: &Snapshot,
    patterns: &[SelectorPattern],
    category: &str,
    model_context: &str,
) -> Vec<ExtractedOption> {
    snapshot
        .elements
        .iter()
        .filter(|el| el.visible && !el.text.trim().is_empty())
        .filter(|el| classify(el) == ElementRole::Option || el.disabled)
        .filter(|el| patterns.iter().any(|p| p.matches(el)))
        .map(|el| ExtractedOption {
            category: category.to_string(),
            component: el.text.split_whitespace().collect::<Vec<_>>().join(" "),
            price: el.price_text.clone(),
            model_context: model_context.to_string(),
            image_ref: el.image_ref.clone(),
        })
        .collect()
}

/// 匹配模式的元素；有提示文字时优先包含提示文字的元素
pub fn pick_element<'a>(
    snapshot: &'a Snapshot,
    pattern: &SelectorPattern,
    hint: Option<&str>,
) -> Option<&'a ElementDescriptor> {
    let mut candidates = snapshot.actionable().filter(|e| pattern.matches(e));
    let first = candidates.next()?;
    if let Some(hint) = hint.map(normalize_text).filter(|h| !h.is_empty()) {
        if first.normalized_text().contains(&hint) {
            return Some(first);
        }
        if let Some(preferred) = candidates.find(|e| e.normalized_text().contains(&hint)) {
            return Some(preferred);
        }
    }
    Some(first)
}

/// 具体元素 → 带文字前缀的模式（只用于本次点击，不会写入记忆）
pub fn concrete_pattern(el: &ElementDescriptor) -> SelectorPattern {
    SelectorPattern::from_element(el).with_text_hint(&el.text)
}
