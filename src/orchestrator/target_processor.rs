//! 单个目标处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责处理单个探索目标，是目标级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **模式选择**：配置了决策服务时走探索流程，否则走 DOM 差分探索
//! 2. **结果输出**：选项写入输出，生成运行报告
//! 3. **统计输出**：记录选项数量、结束原因和记忆统计

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::infrastructure::BrowserDriver;
use crate::models::{ExplorationTarget, ExtractedOption, MemoryStats};
use crate::services::memory::site_domain;
use crate::services::option_sink::{write_report, OptionSink};
use crate::services::{DomDiffExplorer, DomDiffReport};
use crate::utils::logging::truncate_text;
use crate::workflow::{ExplorationFlow, ExplorationOutcome};

/// 探索模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationMode {
    /// 记忆 + 决策服务 + 工作流回放
    Guided,
    /// 点击 + 文本差分
    DomDiff,
}

/// 一个目标的运行报告
#[derive(Debug, Serialize)]
pub struct TargetReport {
    pub index: usize,
    pub target_url: String,
    pub name: String,
    pub mode: ExplorationMode,
    pub completed: bool,
    pub options: Vec<ExtractedOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExplorationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_diff: Option<DomDiffReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
}

/// 目标处理统计
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetStats {
    pub options: usize,
    pub completed: bool,
}

/// 所有目标共享的处理能力
pub struct TargetProcessor {
    flow: Option<ExplorationFlow>,
    dom_diff: DomDiffExplorer,
    sink: Arc<dyn OptionSink>,
    reports_dir: Option<PathBuf>,
}

impl TargetProcessor {
    /// `flow` 为 `None` 时使用 DOM 差分探索
    pub fn new(
        flow: Option<ExplorationFlow>,
        dom_diff: DomDiffExplorer,
        sink: Arc<dyn OptionSink>,
        reports_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            flow,
            dom_diff,
            sink,
            reports_dir,
        }
    }

    pub fn mode(&self) -> ExplorationMode {
        if self.flow.is_some() {
            ExplorationMode::Guided
        } else {
            ExplorationMode::DomDiff
        }
    }

    /// 处理单个目标
    ///
    /// # 参数
    /// - `driver`: 该目标独占的页面驱动（处理结束时关闭）
    /// - `target`: 探索目标
    /// - `target_index`: 目标索引（用于日志和报告文件名）
    pub async fn process(
        &self,
        driver: &mut dyn BrowserDriver,
        target: &ExplorationTarget,
        target_index: usize,
    ) -> TargetStats {
        log_target_start(target_index, target, self.mode());

        let mut report = match &self.flow {
            Some(flow) => self.run_guided(flow, driver, target, target_index).await,
            None => self.run_dom_diff(driver, target, target_index).await,
        };

        if let Some(flow) = &self.flow {
            let site = site_domain(&target.url);
            report.memory = flow.memory().stats(Some(&site)).await;
        }

        if let Err(e) = self.sink.write(&target.url, &report.options).await {
            warn!("[目标 {}] ⚠️ 写出选项失败: {}", target_index, e);
        }
        if let Some(dir) = &self.reports_dir {
            let path = dir.join(format!("target_{:03}.json", target_index));
            if let Err(e) = write_report(&path, &report) {
                warn!("[目标 {}] ⚠️ 写入运行报告失败: {}", target_index, e);
            }
        }

        log_target_complete(target_index, &report);
        TargetStats {
            options: report.options.len(),
            completed: report.completed,
        }
    }

    async fn run_guided(
        &self,
        flow: &ExplorationFlow,
        driver: &mut dyn BrowserDriver,
        target: &ExplorationTarget,
        target_index: usize,
    ) -> TargetReport {
        let outcome = flow.run(driver, target).await;
        for model in &outcome.models {
            info!(
                "[目标 {}] 型号 {}: {} ({} 个选项, {} 步)",
                target_index, model.model, model.termination, model.options_found, model.steps
            );
        }
        TargetReport {
            index: target_index,
            target_url: target.url.clone(),
            name: target.display_name().to_string(),
            mode: ExplorationMode::Guided,
            completed: outcome.is_complete(),
            options: outcome.options.clone(),
            outcome: Some(outcome),
            dom_diff: None,
            error: None,
            memory: None,
        }
    }

    async fn run_dom_diff(
        &self,
        driver: &mut dyn BrowserDriver,
        target: &ExplorationTarget,
        target_index: usize,
    ) -> TargetReport {
        let model = target
            .model_names()
            .into_iter()
            .next()
            .unwrap_or_default();

        let result = match driver.navigate(&target.url).await {
            Ok(()) => self.dom_diff.explore(driver).await,
            Err(e) => Err(e),
        };
        if let Err(e) = driver.close().await {
            warn!("[目标 {}] ⚠️ 关闭页面失败: {}", target_index, e);
        }

        let mut report = TargetReport {
            index: target_index,
            target_url: target.url.clone(),
            name: target.display_name().to_string(),
            mode: ExplorationMode::DomDiff,
            completed: false,
            options: Vec::new(),
            outcome: None,
            dom_diff: None,
            error: None,
            memory: None,
        };
        match result {
            Ok(diff) => {
                report.completed = !diff.budget_exhausted;
                report.options = diff.options(&model);
                report.dom_diff = Some(diff);
            }
            Err(e) => {
                warn!("[目标 {}] ❌ DOM 差分探索失败: {}", target_index, e);
                report.error = Some(e.to_string());
            }
        }
        report
    }
}

// ========== 日志辅助函数 ==========

fn log_target_start(target_index: usize, target: &ExplorationTarget, mode: ExplorationMode) {
    info!("\n{}", "─".repeat(60));
    info!(
        "[目标 {}] 🎯 {} ({:?})",
        target_index,
        target.display_name(),
        mode
    );
    info!("[目标 {}] 🌐 {}", target_index, truncate_text(&target.url, 100));
    info!("{}", "─".repeat(60));
}

fn log_target_complete(target_index: usize, report: &TargetReport) {
    let status = if report.completed { "✅" } else { "⚠️" };
    info!(
        "[目标 {}] {} 完成: {} 个选项",
        target_index,
        status,
        report.options.len()
    );
    if let Some(memory) = &report.memory {
        info!(
            "[目标 {}] 🧠 记忆: {} 个状态, {} 条转移, {} 个继续模式",
            target_index, memory.states, memory.transitions, memory.continue_patterns
        );
    }
}
