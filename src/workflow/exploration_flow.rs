//! 探索流程 - 流程层
//!
//! 核心职责：定义"一个目标"的完整探索流程
//!
//! 每一轮：
//! 1. 采集页面 → 计算签名 → 登记状态
//! 2. 工作流已锁定且有当前步骤 → 按模式回放
//! 3. 记忆中有置信转移 → 记忆回放
//! 4. 询问决策服务（不可用时只尝试"继续"）
//! 5. 执行动作 → 记录转移结果

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::ExplorationLimits;
use crate::error::{ExploreError, Result};
use crate::infrastructure::BrowserDriver;
use crate::models::{
    ElementDescriptor, ExplorationTarget, PageState, SelectorPattern, Snapshot, StateId,
    StepAction, Transition,
};
use crate::services::learner::{concrete_pattern, default_step_name, options_matching, pick_element};
use crate::services::{compute_signature, DecisionOracle, MemoryHandle};
use crate::workflow::session::{ExplorationOutcome, ExplorationSession, TerminationReason};

/// 动作来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionSource {
    PatternReplay,
    MemoryReplay,
    Oracle,
    ContinueOnly,
}

impl ActionSource {
    fn label(&self) -> &'static str {
        match self {
            ActionSource::PatternReplay => "模式回放",
            ActionSource::MemoryReplay => "记忆回放",
            ActionSource::Oracle => "决策服务",
            ActionSource::ContinueOnly => "仅继续",
        }
    }
}

/// 一轮决策的结果
enum Decision {
    Act {
        action: StepAction,
        source: ActionSource,
        /// 记忆回放时使用的转移
        replayed: Option<Transition>,
    },
    Complete,
    Stop(TerminationReason, String),
}

/// 当前页面（采集结果 + 签名 + 记忆中的状态）
struct Observed {
    snapshot: Snapshot,
    signature: String,
    state: Option<PageState>,
}

/// 探索流程
///
/// - 编排单个目标（可能包含多个型号）的完整探索
/// - 不持有页面资源，通过 [`BrowserDriver`] 操作
/// - 永远返回结果：出错时带着已抽取的选项和结束原因返回
pub struct ExplorationFlow {
    oracle: Option<Arc<dyn DecisionOracle>>,
    memory: MemoryHandle,
    limits: ExplorationLimits,
}

impl ExplorationFlow {
    pub fn new(
        oracle: Option<Arc<dyn DecisionOracle>>,
        memory: MemoryHandle,
        limits: ExplorationLimits,
    ) -> Self {
        Self {
            oracle,
            memory,
            limits,
        }
    }

    pub fn memory(&self) -> &MemoryHandle {
        &self.memory
    }

    /// 探索一个目标的所有型号，结束时关闭页面
    pub async fn run(
        &self,
        driver: &mut dyn BrowserDriver,
        target: &ExplorationTarget,
    ) -> ExplorationOutcome {
        let mut session = ExplorationSession::new(target.clone(), self.oracle.is_some());
        let models = target.model_names();
        info!(
            "🚀 开始探索 {} ({} 个型号, 站点 {})",
            target.display_name(),
            models.len(),
            session.site_domain
        );

        for model in &models {
            session.begin_model(model);
            info!("{} ▶ 开始探索型号", session);

            let (reason, detail) = match driver.navigate(&target.url).await {
                Ok(()) => self.explore_model(driver, &mut session).await,
                Err(e) => (TerminationReason::NavigationFailed, Some(e.to_string())),
            };

            if reason.is_success() {
                info!("{} ✅ {}", session, reason);
            } else {
                warn!(
                    "{} ⚠️ {}: {}",
                    session,
                    reason,
                    detail.as_deref().unwrap_or("-")
                );
            }
            session.finish_model(reason, detail);
            if reason.stops_session() {
                break;
            }
        }

        if let Err(e) = driver.close().await {
            warn!("⚠️ 关闭页面失败: {}", e);
        }

        let outcome = session.into_outcome();
        info!(
            "🏁 {} 探索结束: {} 个选项, {} 个型号, 决策调用 {} 次, 记忆回放 {} 次, 模式回放 {} 次",
            target.display_name(),
            outcome.options.len(),
            outcome.models.len(),
            outcome.stats.oracle_calls,
            outcome.stats.memory_replays,
            outcome.stats.pattern_replays
        );
        outcome
    }

    /// 探索当前型号，直到完成或某个停止条件
    async fn explore_model(
        &self,
        driver: &mut dyn BrowserDriver,
        session: &mut ExplorationSession,
    ) -> (TerminationReason, Option<String>) {
        let mut carried: Option<Snapshot> = None;

        loop {
            if let Some(reason) = session.budget_exceeded(&self.limits) {
                return (reason, None);
            }
            session.iteration += 1;
            session.stats.iterations += 1;

            // ========== 采集 ==========
            let snapshot = match carried.take() {
                Some(snapshot) => snapshot,
                None => match self.capture(driver).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => return (TerminationReason::CaptureFailure, Some(e.to_string())),
                },
            };
            let observed = self.observe(session, snapshot).await;

            if observed.state.as_ref().is_some_and(|s| s.is_terminal) {
                info!("{} 🏁 记忆中的终止状态", session);
                session.learner.lock();
                return (TerminationReason::Completed, None);
            }

            let visits = session
                .progress
                .record_visit(&observed.signature, session.options.len());
            if visits > self.limits.max_state_revisits + 1 {
                return (
                    TerminationReason::CycleDetected,
                    Some(ExploreError::CycleDetected {
                        signature: observed.signature.clone(),
                    }
                    .to_string()),
                );
            }

            // ========== 决策 ==========
            let (action, source, replayed) = match self.decide(session, &observed).await {
                Decision::Act {
                    action,
                    source,
                    replayed,
                } => (action, source, replayed),
                Decision::Complete => {
                    self.mark_terminal(session, &observed).await;
                    session.learner.lock();
                    return (TerminationReason::Completed, None);
                }
                Decision::Stop(reason, detail) => return (reason, Some(detail)),
            };
            info!("{} [{}] {}", session, source.label(), action);

            // ========== 执行 ==========
            if let Err(e) = self.execute(driver, session, &action).await {
                session.stats.failed_actions += 1;
                session.progress.consecutive_failures += 1;
                warn!(
                    "{} ❌ 动作失败 ({}/{}): {}",
                    session,
                    session.progress.consecutive_failures,
                    self.limits.max_consecutive_failures,
                    e
                );
                if let (Some(from), Some(transition)) = (&observed.state, &replayed) {
                    self.record(session, from.id, transition.to_state, &transition.action, false)
                        .await;
                }
                if session.progress.consecutive_failures >= self.limits.max_consecutive_failures {
                    return (TerminationReason::ConsecutiveFailures, Some(e.to_string()));
                }
                continue;
            }

            // ========== 记录 ==========
            let after = match self.capture(driver).await {
                Ok(snapshot) => snapshot,
                Err(e) => return (TerminationReason::CaptureFailure, Some(e.to_string())),
            };
            let after_signature = compute_signature(&after);
            let changed = after_signature != observed.signature
                || after.visible_text != observed.snapshot.visible_text;

            if changed {
                session.progress.reset_failures();
                if action.advance_pattern().is_some() {
                    session.progress.step_index += 1;
                }
                self.record_success(session, &observed, &after_signature, &action, replayed.as_ref())
                    .await;
            } else {
                if let (Some(from), Some(transition)) = (&observed.state, &replayed) {
                    self.record(session, from.id, transition.to_state, &transition.action, false)
                        .await;
                }
                if let Some(advance) = action.generalized().advance_pattern() {
                    self.memory
                        .upsert_continue_pattern(&session.site_domain, advance, false)
                        .await;
                }
                session.progress.stagnation_retries += 1;
                if session.progress.stagnation_retries > self.limits.max_stagnation_retries {
                    return (
                        TerminationReason::CycleDetected,
                        Some(format!("动作后页面没有变化: {}", action)),
                    );
                }
                debug!("{} 页面没有变化，下一轮只尝试继续", session);
                session.progress.force_continue = true;
            }
            carried = Some(after);
        }
    }

    /// 采集页面，可重试的错误重试一次
    async fn capture(&self, driver: &mut dyn BrowserDriver) -> Result<Snapshot> {
        match driver.snapshot().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.is_retryable() => {
                warn!("⚠️ 页面采集失败，重试一次: {}", e);
                driver.snapshot().await
            }
            Err(e) => Err(e),
        }
    }

    /// 已知状态只读，新状态才写入
    async fn observe(&self, session: &ExplorationSession, snapshot: Snapshot) -> Observed {
        let signature = compute_signature(&snapshot);
        let known = self
            .memory
            .get_state_by_signature(&session.site_domain, &signature)
            .await;
        let state = match known {
            Some(state) => Some(state),
            None => {
                self.memory
                    .upsert_state(
                        &session.site_domain,
                        &signature,
                        &session.progress.model,
                        session.progress.step_index,
                        false,
                    )
                    .await
            }
        };
        debug!(
            "签名 {} (状态 {:?}, {} 个元素)",
            &signature[..12.min(signature.len())],
            state.as_ref().map(|s| s.id),
            snapshot.elements.len()
        );
        Observed {
            snapshot,
            signature,
            state,
        }
    }

    async fn mark_terminal(&self, session: &ExplorationSession, observed: &Observed) {
        self.memory
            .upsert_state(
                &session.site_domain,
                &observed.signature,
                &session.progress.model,
                session.progress.step_index,
                true,
            )
            .await;
    }

    // ========== 决策 ==========

    async fn decide(&self, session: &mut ExplorationSession, observed: &Observed) -> Decision {
        let snapshot = &observed.snapshot;
        let step_index = session.progress.step_index;

        if session.progress.force_continue {
            if let Some(action) = self.continue_only(session, snapshot).await {
                return Decision::Act {
                    action,
                    source: ActionSource::ContinueOnly,
                    replayed: None,
                };
            }
        }

        // 已锁定的工作流
        if session.learner.is_locked() {
            let past_last_step = session
                .learner
                .last_step_index()
                .is_some_and(|last| step_index > last);
            if past_last_step {
                info!("{} 🏁 已走完学到的工作流", session);
                return Decision::Complete;
            }
            if let Some(action) =
                session
                    .learner
                    .plan_step(step_index, snapshot, Some(&session.progress.model))
            {
                let options = session.learner.extract_step_options(
                    step_index,
                    snapshot,
                    &session.progress.model,
                );
                session.add_options(options);
                session.stats.pattern_replays += 1;
                return Decision::Act {
                    action,
                    source: ActionSource::PatternReplay,
                    replayed: None,
                };
            }
            debug!("{} 学到的模式在当前页面没有匹配", session);
        }

        // 记忆回放
        if let Some(state) = &observed.state {
            if let Some(transition) = self.memory.confident_transition(state.id).await {
                match concretize(&transition.action, snapshot, &session.progress.model) {
                    Some(action) => {
                        session.stats.memory_replays += 1;
                        debug!(
                            "记忆转移 {} → {} (置信度 {:.2}, {} 次)",
                            transition.from_state,
                            transition.to_state,
                            transition.confidence(),
                            transition.seen_count()
                        );
                        if let Some(option) = transition.action.option_pattern() {
                            let options = options_matching(
                                snapshot,
                                std::slice::from_ref(option),
                                &default_step_name(step_index),
                                &session.progress.model,
                            );
                            session.add_options(options);
                        }
                        return Decision::Act {
                            action,
                            source: ActionSource::MemoryReplay,
                            replayed: Some(transition),
                        };
                    }
                    None => {
                        warn!("{} ⚠️ 记忆中的动作在当前页面找不到元素，记为一次失败", session);
                        self.record(session, state.id, transition.to_state, &transition.action, false)
                            .await;
                    }
                }
            }
        }

        // 决策服务
        if session.oracle_available {
            if let Some(oracle) = &self.oracle {
                session.stats.oracle_calls += 1;
                match oracle.consult(snapshot, &session.context()).await {
                    Ok(guidance) => {
                        let model = session.progress.model.clone();
                        let added = session.add_options(
                            guidance
                                .new_options
                                .into_iter()
                                .map(|o| o.into_extracted(&model)),
                        );
                        if added > 0 {
                            info!("{} 📋 新增 {} 个选项", session, added);
                        }
                        if guidance.complete {
                            info!("{} 🏁 决策服务确认配置完成", session);
                            return Decision::Complete;
                        }
                        if let Some(action) = guidance.recommended_action {
                            if matches!(action, StepAction::SelectAndAdvance { .. })
                                && !session.learner.is_locked()
                            {
                                let step_name = guidance.step_name.as_deref().unwrap_or_default();
                                session.learner.learn(step_index, step_name, snapshot, &action);
                            }
                            return Decision::Act {
                                action,
                                source: ActionSource::Oracle,
                                replayed: None,
                            };
                        }
                        debug!("{} 决策服务没有推荐动作", session);
                    }
                    Err(e) => {
                        error!("{} 🔌 决策服务不可用，切换为仅继续模式: {}", session, e);
                        session.oracle_available = false;
                    }
                }
            }
        }

        // 只尝试"继续"
        if let Some(action) = self.continue_only(session, snapshot).await {
            return Decision::Act {
                action,
                source: ActionSource::ContinueOnly,
                replayed: None,
            };
        }

        if session.oracle_available {
            Decision::Stop(
                TerminationReason::NoActionAvailable,
                "页面上没有可执行的动作".to_string(),
            )
        } else {
            Decision::Stop(
                TerminationReason::OracleUnavailable,
                "决策服务不可用且没有匹配的继续按钮".to_string(),
            )
        }
    }

    /// 先用记忆中达到门槛的最佳"继续"模式，再用本会话学到的
    async fn continue_only(
        &self,
        session: &mut ExplorationSession,
        snapshot: &Snapshot,
    ) -> Option<StepAction> {
        let remembered = self.memory.best_continue_pattern(&session.site_domain).await;
        let element = remembered
            .as_ref()
            .map(|p| &p.pattern)
            .into_iter()
            .chain(session.learner.continue_patterns().iter())
            .find_map(|p| snapshot.find_matching(p))?;
        session.stats.continue_only_actions += 1;
        Some(StepAction::Advance {
            advance: concrete_pattern(element),
        })
    }

    // ========== 执行 ==========

    async fn execute(
        &self,
        driver: &mut dyn BrowserDriver,
        session: &mut ExplorationSession,
        action: &StepAction,
    ) -> Result<()> {
        if let Some(option) = action.option_pattern() {
            self.click_with_fallback(driver, session, option).await?;
        }
        if let Some(advance) = action.advance_pattern() {
            self.click_with_fallback(driver, session, advance).await?;
        }
        Ok(())
    }

    /// 点击失败时用备用策略重试一次
    async fn click_with_fallback(
        &self,
        driver: &mut dyn BrowserDriver,
        session: &mut ExplorationSession,
        pattern: &SelectorPattern,
    ) -> Result<()> {
        let first_error = match driver.click(pattern).await {
            Ok(true) => return Ok(()),
            Ok(false) => "没有匹配的可点击元素".to_string(),
            Err(e) => e.to_string(),
        };

        let Some(alternate) = pattern.fallback() else {
            return Err(ExploreError::action(pattern, first_error));
        };
        debug!("点击 {} 失败 ({})，改用 {}", pattern, first_error, alternate);
        match driver.click(&alternate).await {
            Ok(true) => {
                session.stats.fallback_clicks += 1;
                Ok(())
            }
            Ok(false) => Err(ExploreError::action(
                pattern,
                format!("{}; 备用策略也没有匹配", first_error),
            )),
            Err(e) => Err(ExploreError::action(
                pattern,
                format!("{}; 备用策略: {}", first_error, e),
            )),
        }
    }

    // ========== 记录 ==========

    async fn record_success(
        &self,
        session: &mut ExplorationSession,
        observed: &Observed,
        after_signature: &str,
        action: &StepAction,
        replayed: Option<&Transition>,
    ) {
        let generalized = action.generalized();
        if let Some(advance) = generalized.advance_pattern() {
            self.memory
                .upsert_continue_pattern(&session.site_domain, advance, true)
                .await;
        }

        let Some(from) = &observed.state else {
            return;
        };
        let Some(to) = self
            .memory
            .upsert_state(
                &session.site_domain,
                after_signature,
                &session.progress.model,
                session.progress.step_index,
                false,
            )
            .await
        else {
            return;
        };

        match replayed {
            Some(transition) if transition.to_state != to.id => {
                debug!(
                    "记忆回放到达了不同的状态 ({} 而不是 {})",
                    to.id, transition.to_state
                );
                self.record(session, from.id, to.id, &transition.action, true)
                    .await;
            }
            Some(transition) => {
                self.record(session, from.id, transition.to_state, &transition.action, true)
                    .await;
            }
            None => self.record(session, from.id, to.id, &generalized, true).await,
        }
    }

    async fn record(
        &self,
        session: &mut ExplorationSession,
        from: StateId,
        to: StateId,
        action: &StepAction,
        success: bool,
    ) {
        if self.memory.record_transition(from, to, action, success).await {
            session.stats.transitions_recorded += 1;
        }
    }
}

/// 先按原模式查找，找不到时用备用策略再找一次
fn resolve<'a>(
    pattern: &SelectorPattern,
    find: impl Fn(&SelectorPattern) -> Option<&'a ElementDescriptor>,
) -> Option<SelectorPattern> {
    find(pattern)
        .or_else(|| pattern.fallback().and_then(|alternate| find(&alternate)))
        .map(concrete_pattern)
}

/// 把记忆中的泛化动作落到当前页面的具体元素上
///
/// 选项优先选择文字包含型号名的元素；任一部分连备用策略也找不到元素时返回 `None`。
fn concretize(action: &StepAction, snapshot: &Snapshot, model: &str) -> Option<StepAction> {
    let option = |pattern: &SelectorPattern| {
        resolve(pattern, |p| pick_element(snapshot, p, Some(model)))
    };
    let advance = |pattern: &SelectorPattern| resolve(pattern, |p| snapshot.find_matching(p));

    Some(match action {
        StepAction::Select { option: o } => StepAction::Select { option: option(o)? },
        StepAction::SelectAndAdvance {
            option: o,
            advance: a,
        } => StepAction::SelectAndAdvance {
            option: option(o)?,
            advance: advance(a)?,
        },
        StepAction::Advance { advance: a } => StepAction::Advance {
            advance: advance(a)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementDescriptor;

    fn el(tag: &str, class: &str, text: &str) -> ElementDescriptor {
        ElementDescriptor {
            tag: tag.into(),
            class_signature: vec![class.into()],
            text: text.into(),
            visible: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_concretize_prefers_model_text() {
        let snapshot = Snapshot {
            elements: vec![
                el("div", "card", "The Solo"),
                el("div", "card", "The Duo"),
                el("button", "next", "Continue"),
            ],
            ..Default::default()
        };
        let stored = StepAction::SelectAndAdvance {
            option: SelectorPattern::from_element(&snapshot.elements[0]),
            advance: SelectorPattern::from_element(&snapshot.elements[2]).with_text_hint("continue"),
        };
        match concretize(&stored, &snapshot, "The Duo").unwrap() {
            StepAction::SelectAndAdvance { option, advance } => {
                assert_eq!(option.text_hint.as_deref(), Some("the duo"));
                assert_eq!(advance.text_hint.as_deref(), Some("continue"));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_concretize_falls_back_when_text_changed() {
        let snapshot = Snapshot {
            elements: vec![el("div", "card", "The Solo"), el("button", "next", "Next")],
            ..Default::default()
        };
        let stored = StepAction::Advance {
            advance: SelectorPattern::from_element(&snapshot.elements[1]).with_text_hint("continue"),
        };
        match concretize(&stored, &snapshot, "default").unwrap() {
            StepAction::Advance { advance } => {
                assert_eq!(advance.text_hint.as_deref(), Some("next"));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_concretize_missing_element() {
        let snapshot = Snapshot {
            elements: vec![el("div", "card", "The Solo")],
            ..Default::default()
        };
        let stored = StepAction::Advance {
            advance: SelectorPattern::from_element(&el("button", "next", "Next")),
        };
        assert!(concretize(&stored, &snapshot, "default").is_none());
    }
}
