//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量目标处理器
//! - 管理应用生命周期（初始化、运行、清理）
//! - 批量加载探索目标（Vec<ExplorationTarget>）
//! - 控制并发数量（Semaphore）
//! - 管理浏览器资源（Browser，每个会话一个页面）
//! - 输出全局统计信息
//!
//! ### `target_processor` - 单个目标处理器
//! - 选择探索模式（探索流程 / DOM 差分）
//! - 写出选项和运行报告
//! - 输出单个目标的统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<ExplorationTarget>)
//!     ↓
//! target_processor (处理单个目标)
//!     ↓
//! workflow::ExplorationFlow (逐个型号探索)
//!     ↓
//! services (能力层：capture / memory / oracle / learner / dom_diff)
//!     ↓
//! infrastructure (基础设施：BrowserDriver)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管批量，target_processor 管单个
//! 2. **资源隔离**：只有编排层持有 Browser
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务逻辑**：只做调度和统计，不做探索决策

pub mod batch_processor;
pub mod target_processor;

// 重新导出主要类型
pub use batch_processor::App;
pub use target_processor::{ExplorationMode, TargetProcessor, TargetReport, TargetStats};
