//! 探索会话
//!
//! 封装"我正在探索哪个目标的哪个型号、走到第几步"这一信息，
//! 由探索流程独占，贯穿每一次调用。

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::time::Instant;

use serde::Serialize;

use crate::config::ExplorationLimits;
use crate::models::{ExplorationTarget, ExtractedOption, SessionContext};
use crate::services::memory::site_domain;
use crate::services::WorkflowLearner;

/// 最近选项的数量（交给决策服务避免重复汇报）
const RECENT_OPTIONS: usize = 20;

/// 型号探索结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// 决策服务或已锁定的工作流确认配置完成
    Completed,
    MaxIterations,
    TimeBudgetExhausted,
    /// 决策服务不可用且没有可用的"继续"模式
    OracleUnavailable,
    CycleDetected,
    /// 连续多次动作失败
    ConsecutiveFailures,
    CaptureFailure,
    NavigationFailed,
    /// 页面上没有可执行的动作
    NoActionAvailable,
}

impl TerminationReason {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminationReason::Completed)
    }

    /// 会话级预算：耗尽后后续型号也不再探索
    pub fn stops_session(&self) -> bool {
        matches!(
            self,
            TerminationReason::MaxIterations | TerminationReason::TimeBudgetExhausted
        )
    }
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::Completed => "配置完成",
            TerminationReason::MaxIterations => "达到最大迭代次数",
            TerminationReason::TimeBudgetExhausted => "时间预算耗尽",
            TerminationReason::OracleUnavailable => "决策服务不可用",
            TerminationReason::CycleDetected => "检测到循环",
            TerminationReason::ConsecutiveFailures => "连续动作失败",
            TerminationReason::CaptureFailure => "页面采集失败",
            TerminationReason::NavigationFailed => "导航失败",
            TerminationReason::NoActionAvailable => "没有可执行的动作",
        };
        f.write_str(text)
    }
}

/// 单个型号的探索结果
#[derive(Debug, Clone, Serialize)]
pub struct ModelOutcome {
    pub model: String,
    pub termination: TerminationReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub options_found: usize,
    pub steps: u32,
}

/// 会话计数（随结果按值返回）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub iterations: u32,
    pub oracle_calls: u32,
    pub memory_replays: u32,
    pub pattern_replays: u32,
    pub continue_only_actions: u32,
    pub failed_actions: u32,
    pub fallback_clicks: u32,
    pub transitions_recorded: u32,
}

/// 一个目标的探索结果：即使中途终止也包含已抽取的选项
#[derive(Debug, Clone, Serialize)]
pub struct ExplorationOutcome {
    pub target_url: String,
    pub site_domain: String,
    pub options: Vec<ExtractedOption>,
    pub models: Vec<ModelOutcome>,
    pub stats: SessionStats,
    pub learned_steps: usize,
    pub workflow_locked: bool,
    pub elapsed_secs: f64,
}

impl ExplorationOutcome {
    /// 所有型号都正常完成
    pub fn is_complete(&self) -> bool {
        !self.models.is_empty() && self.models.iter().all(|m| m.termination.is_success())
    }

    /// 最后一个型号的结束原因
    pub fn termination(&self) -> Option<TerminationReason> {
        self.models.last().map(|m| m.termination)
    }
}

/// 当前型号的进度（切换型号时重置）
#[derive(Debug, Default)]
pub struct ModelProgress {
    pub model: String,
    pub step_index: u32,
    pub consecutive_failures: u32,
    pub stagnation_retries: u32,
    /// 上一个动作没有改变页面，下一轮只尝试"继续"
    pub force_continue: bool,
    options_at_start: usize,
    /// 签名 → (连续无新选项的访问次数, 上次访问时的选项数)
    visits: HashMap<String, (u32, usize)>,
}

impl ModelProgress {
    fn new(model: &str, options_at_start: usize) -> Self {
        Self {
            model: model.to_string(),
            options_at_start,
            ..Default::default()
        }
    }

    /// 记录一次访问，返回该状态连续没有新选项的访问次数
    pub fn record_visit(&mut self, signature: &str, options_total: usize) -> u32 {
        let entry = self
            .visits
            .entry(signature.to_string())
            .or_insert((0, options_total));
        if options_total > entry.1 {
            *entry = (1, options_total);
        } else {
            entry.0 += 1;
        }
        entry.0
    }

    /// 动作改变了页面
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.stagnation_retries = 0;
        self.force_continue = false;
    }
}

/// 探索会话
pub struct ExplorationSession {
    pub target: ExplorationTarget,
    pub site_domain: String,
    pub started: Instant,
    /// 会话级迭代计数（所有型号共享预算）
    pub iteration: u32,
    pub options: Vec<ExtractedOption>,
    option_keys: HashSet<(String, String, String)>,
    pub learner: WorkflowLearner,
    pub oracle_available: bool,
    pub stats: SessionStats,
    pub progress: ModelProgress,
    pub models: Vec<ModelOutcome>,
}

impl ExplorationSession {
    pub fn new(target: ExplorationTarget, oracle_available: bool) -> Self {
        let site_domain = site_domain(&target.url);
        Self {
            target,
            site_domain,
            started: Instant::now(),
            iteration: 0,
            options: Vec::new(),
            option_keys: HashSet::new(),
            learner: WorkflowLearner::new(),
            oracle_available,
            stats: SessionStats::default(),
            progress: ModelProgress::default(),
            models: Vec::new(),
        }
    }

    pub fn begin_model(&mut self, model: &str) {
        self.progress = ModelProgress::new(model, self.options.len());
    }

    pub fn finish_model(&mut self, termination: TerminationReason, detail: Option<String>) {
        self.models.push(ModelOutcome {
            model: self.progress.model.clone(),
            termination,
            detail,
            options_found: self.options.len() - self.progress.options_at_start,
            steps: self.progress.step_index,
        });
    }

    /// 加入选项（会话内去重），返回新增数量
    pub fn add_options(&mut self, options: impl IntoIterator<Item = ExtractedOption>) -> usize {
        let mut added = 0;
        for option in options {
            if self.option_keys.insert(option.dedupe_key()) {
                self.options.push(option);
                added += 1;
            }
        }
        added
    }

    /// 每轮迭代前检查会话级预算
    pub fn budget_exceeded(&self, limits: &ExplorationLimits) -> Option<TerminationReason> {
        if self.iteration >= limits.max_iterations {
            Some(TerminationReason::MaxIterations)
        } else if self.started.elapsed() >= limits.time_budget {
            Some(TerminationReason::TimeBudgetExhausted)
        } else {
            None
        }
    }

    pub fn context(&self) -> SessionContext {
        let skip = self.options.len().saturating_sub(RECENT_OPTIONS);
        SessionContext {
            site_domain: self.site_domain.clone(),
            model_name: self.progress.model.clone(),
            iteration: self.iteration,
            step_index: self.progress.step_index,
            recent_options: self.options[skip..].to_vec(),
        }
    }

    pub fn into_outcome(self) -> ExplorationOutcome {
        ExplorationOutcome {
            target_url: self.target.url,
            site_domain: self.site_domain,
            learned_steps: self.learner.steps().len(),
            workflow_locked: self.learner.is_locked(),
            options: self.options,
            models: self.models,
            stats: self.stats,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl Display for ExplorationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[目标 {} 模型 {} 步骤#{}]",
            self.target.display_name(),
            self.progress.model,
            self.progress.step_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn option(component: &str, model: &str) -> ExtractedOption {
        ExtractedOption {
            category: "Wood".into(),
            component: component.into(),
            price: None,
            model_context: model.into(),
            image_ref: None,
        }
    }

    #[test]
    fn test_add_options_dedupes_per_model() {
        let mut session = ExplorationSession::new(ExplorationTarget::new("https://example.com"), true);
        assert_eq!(session.add_options(vec![option("Cedar", "A"), option("cedar ", "A")]), 1);
        assert_eq!(session.add_options(vec![option("Cedar", "B")]), 1);
        assert_eq!(session.options.len(), 2);
    }

    #[test]
    fn test_budget_checks() {
        let mut session = ExplorationSession::new(ExplorationTarget::new("https://example.com"), true);
        let limits = ExplorationLimits {
            max_iterations: 2,
            ..Default::default()
        };
        assert_eq!(session.budget_exceeded(&limits), None);
        session.iteration = 2;
        assert_eq!(session.budget_exceeded(&limits), Some(TerminationReason::MaxIterations));

        session.iteration = 0;
        let limits = ExplorationLimits {
            time_budget: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            session.budget_exceeded(&limits),
            Some(TerminationReason::TimeBudgetExhausted)
        );
    }

    #[test]
    fn test_record_visit_resets_on_new_options() {
        let mut progress = ModelProgress::new("A", 0);
        assert_eq!(progress.record_visit("sig", 0), 1);
        assert_eq!(progress.record_visit("sig", 0), 2);
        assert_eq!(progress.record_visit("sig", 3), 1);
        assert_eq!(progress.record_visit("other", 3), 1);
    }

    #[test]
    fn test_finish_model_counts_options() {
        let mut session = ExplorationSession::new(ExplorationTarget::new("https://example.com"), true);
        session.begin_model("A");
        session.add_options(vec![option("Cedar", "A")]);
        session.progress.step_index = 2;
        session.finish_model(TerminationReason::Completed, None);

        session.begin_model("B");
        session.finish_model(TerminationReason::OracleUnavailable, Some("timeout".into()));

        let outcome = session.into_outcome();
        assert_eq!(outcome.models[0].options_found, 1);
        assert_eq!(outcome.models[0].steps, 2);
        assert_eq!(outcome.models[1].options_found, 0);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.termination(), Some(TerminationReason::OracleUnavailable));
        assert_eq!(outcome.site_domain, "example.com");
    }
}
