//! # Configurator Explorer
//!
//! 一个用于自动探索网页产品配置器、提取全部选项的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//! - `BrowserDriver` - 导航 / 快照 / 点击 / 撤销的抽象接口
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个页面
//! - `PageCapturer` - 页面快照能力
//! - `MemoryHandle` - 状态与转移记忆能力
//! - `LlmOracle` - LLM 决策能力
//! - `WorkflowLearner` - 工作流学习与回放能力
//! - `DomDiffExplorer` - 无决策服务时的点击差分探索能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个目标"的完整探索流程
//! - `ExplorationSession` - 会话上下文（目标 + 型号 + 步骤）
//! - `ExplorationFlow` - 流程编排（快照 → 记忆 → 决策 → 执行 → 记录）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量目标处理器，管理资源和并发
//! - `orchestrator/target_processor` - 单个目标处理器，选择探索模式并输出结果
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{connect_to_browser, launch_browser, open_session_page};
pub use config::{Config, DomDiffLimits, ExplorationLimits, MemoryBackend};
pub use error::{ExploreError, Result};
pub use infrastructure::{BrowserDriver, ChromiumDriver, JsExecutor};
pub use models::{ExplorationTarget, ExtractedOption, Snapshot};
pub use orchestrator::{App, TargetProcessor};
pub use workflow::{ExplorationFlow, ExplorationOutcome, TerminationReason};
