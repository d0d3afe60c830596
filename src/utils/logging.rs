//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use anyhow::Result;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::MemoryStats;

/// 初始化 tracing 订阅者
///
/// `RUST_LOG` 优先；未设置时默认 info，`verbose` 时为 debug
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n配置器探索日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 配置器探索模式");
    info!("📊 最大并发会话数: {}", config.max_concurrent_sessions);
    if config.oracle_enabled() {
        info!("🤖 决策模型: {}", config.llm_model_name);
    } else {
        info!("🤖 决策服务: 未配置");
    }
    info!("🧠 记忆后端: {:?}", config.memory_backend);
    info!(
        "⏱️ 单会话预算: {} 次迭代 / {} 秒",
        config.max_iterations, config.session_time_budget_secs
    );
    info!("{}", "=".repeat(60));
}

/// 记录目标加载信息
///
/// # 参数
/// - `total`: 目标总数
/// - `max_concurrent`: 最大并发数
pub fn log_targets_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个探索目标", total);
    info!("📋 将以每批 {} 个的方式处理", max_concurrent);
    info!("💡 每批完成后再开始下一批\n");
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号
/// - `total_batches`: 批次总数
/// - `start`: 起始目标编号
/// - `end`: 结束目标编号
/// - `total`: 目标总数
pub fn log_batch_start(
    batch_num: usize,
    total_batches: usize,
    start: usize,
    end: usize,
    total: usize,
) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批", batch_num, total_batches);
    info!("🎯 本批目标: {}-{} / 共 {} 个", start, end, total);
    info!("{}", "=".repeat(60));
}

/// 一次运行（或一个批次）的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    /// 正常结束（到达终态或探索完整）
    pub completed: usize,
    /// 提前结束但保留了部分结果
    pub partial: usize,
    /// 任务本身失败
    pub failed: usize,
    pub options: usize,
}

impl RunStats {
    /// 累加一个批次，`total` 不变
    pub fn merge(&mut self, other: &RunStats) {
        self.completed += other.completed;
        self.partial += other.partial;
        self.failed += other.failed;
        self.options += other.options;
    }
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, stats: &RunStats) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {} 批完成: 完整 {}/{}，部分 {}，失败 {}，选项 {}",
        batch_num, stats.completed, stats.total, stats.partial, stats.failed, stats.options
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 全部目标的汇总
/// - `memory`: 记忆存储的全局统计（无记忆时为 `None`）
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(stats: &RunStats, memory: Option<&MemoryStats>, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部探索完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 完整: {}/{}", stats.completed, stats.total);
    info!("⚠️ 部分: {}", stats.partial);
    info!("❌ 失败: {}", stats.failed);
    info!("🧩 选项总数: {}", stats.options);
    if let Some(memory) = memory {
        info!(
            "🧠 记忆: {} 个状态, {} 条转移, {} 个继续模式",
            memory.states, memory.transitions, memory.continue_patterns
        );
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
