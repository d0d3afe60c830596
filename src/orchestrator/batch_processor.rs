//! 批量目标处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量目标的探索和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：日志文件、浏览器、记忆存储、决策服务
//! 2. **批量加载**：扫描并加载所有探索目标（`Vec<ExplorationTarget>`）
//! 3. **并发控制**：使用 Semaphore 限制同时探索的目标数量
//! 4. **分批处理**：将目标分批次处理，每批完成后再开始下一批
//! 5. **资源管理**：持有 Browser，每个会话独占一个页面
//! 6. **全局统计**：汇总所有目标的探索结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个目标的细节
//! - **资源所有者**：唯一持有 Browser 的模块
//! - **向下委托**：委托 target_processor 处理单个目标

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chromiumoxide::Browser;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::browser;
use crate::config::{Config, MemoryBackend};
use crate::infrastructure::{ChromiumDriver, JsExecutor};
use crate::models::{load_targets, ExplorationTarget};
use crate::orchestrator::target_processor::TargetProcessor;
use crate::services::{
    DecisionOracle, DomDiffExplorer, InMemoryStore, JsonLinesSink, LlmOracle, MemoryHandle,
    SqliteStore,
};
use crate::utils::logging::{
    init_log_file, log_batch_complete, log_batch_start, log_startup, log_targets_loaded,
    print_final_stats, RunStats,
};
use crate::workflow::ExplorationFlow;

/// 应用主结构
pub struct App {
    config: Config,
    browser: Browser,
    processor: Arc<TargetProcessor>,
    memory: MemoryHandle,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        log_startup(&config);

        // 获取浏览器：端口为 0 时自行启动
        let browser = if config.browser_debug_port == 0 {
            browser::launch_browser(config.headless, config.chrome_executable.as_deref()).await?
        } else {
            browser::connect_to_browser(config.browser_debug_port).await?
        };

        let memory = build_memory(&config);
        let flow = if config.oracle_enabled() {
            let oracle: Arc<dyn DecisionOracle> = Arc::new(LlmOracle::new(&config));
            Some(ExplorationFlow::new(
                Some(oracle),
                memory.clone(),
                config.exploration_limits(),
            ))
        } else {
            warn!("⚠️ 未配置 LLM_API_KEY，使用 DOM 差分探索模式");
            None
        };

        let processor = TargetProcessor::new(
            flow,
            DomDiffExplorer::new(config.dom_diff_limits()),
            Arc::new(JsonLinesSink::with_path(config.options_output_file.clone())),
            Some(PathBuf::from(&config.reports_dir)),
        );

        Ok(Self {
            config,
            browser,
            processor: Arc::new(processor),
            memory,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let targets = self.load_targets().await?;

        if targets.is_empty() {
            warn!("⚠️ 没有找到探索目标，程序结束");
            return Ok(());
        }

        log_targets_loaded(targets.len(), self.config.max_concurrent_sessions);

        let stats = self.process_all_targets(targets).await?;

        let memory = self.memory.stats(None).await;
        print_final_stats(&stats, memory.as_ref(), &self.config.output_log_file);

        Ok(())
    }

    async fn load_targets(&self) -> Result<Vec<ExplorationTarget>> {
        info!("\n📁 正在加载探索目标: {}", self.config.targets_file);
        load_targets(&self.config.targets_file).await
    }

    /// 处理所有目标
    async fn process_all_targets(&self, targets: Vec<ExplorationTarget>) -> Result<RunStats> {
        let batch_size = self.config.max_concurrent_sessions.max(1);
        let semaphore = Arc::new(Semaphore::new(batch_size));
        let total = targets.len();
        let total_batches = total.div_ceil(batch_size);
        let mut stats = RunStats {
            total,
            ..Default::default()
        };

        for batch_start in (0..total).step_by(batch_size) {
            let batch_end = (batch_start + batch_size).min(total);
            let batch_num = batch_start / batch_size + 1;

            log_batch_start(batch_num, total_batches, batch_start + 1, batch_end, total);

            let batch = self
                .process_batch(&targets[batch_start..batch_end], batch_start, semaphore.clone())
                .await?;

            log_batch_complete(batch_num, &batch);
            stats.merge(&batch);
        }

        Ok(stats)
    }

    /// 处理单个批次：每个目标一个页面，一个任务
    async fn process_batch(
        &self,
        batch_targets: &[ExplorationTarget],
        batch_start: usize,
        semaphore: Arc<Semaphore>,
    ) -> Result<RunStats> {
        let limits = self.config.exploration_limits();
        let with_screenshot = self.config.oracle_enabled();
        let mut handles = Vec::new();

        for (idx, target) in batch_targets.iter().enumerate() {
            let target_index = batch_start + idx + 1;
            let permit = semaphore.clone().acquire_owned().await?;

            // 页面在主任务中创建，Browser 不离开 App
            let page = match browser::open_session_page(&self.browser).await {
                Ok(page) => page,
                Err(e) => {
                    error!("[目标 {}] ❌ 无法创建页面: {}", target_index, e);
                    handles.push((target_index, None));
                    continue;
                }
            };
            let mut driver = ChromiumDriver::new(JsExecutor::new(page), &limits, with_screenshot);

            let processor = self.processor.clone();
            let target = target.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                processor.process(&mut driver, &target, target_index).await
            });
            handles.push((target_index, Some(handle)));
        }

        let mut result = RunStats {
            total: handles.len(),
            ..Default::default()
        };
        for (target_index, handle) in handles {
            let Some(handle) = handle else {
                result.failed += 1;
                continue;
            };
            match handle.await {
                Ok(target_stats) => {
                    result.options += target_stats.options;
                    if target_stats.completed {
                        result.completed += 1;
                    } else {
                        result.partial += 1;
                    }
                }
                Err(e) => {
                    error!("[目标 {}] 任务执行失败: {}", target_index, e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }
}

/// 按配置创建记忆存储；打不开时降级为无记忆模式
fn build_memory(config: &Config) -> MemoryHandle {
    let thresholds = config.memory_thresholds();
    match config.memory_backend {
        MemoryBackend::Memory => {
            info!("🧠 记忆存储: 进程内");
            MemoryHandle::new(Arc::new(InMemoryStore::new()), thresholds)
        }
        MemoryBackend::Sqlite => match SqliteStore::open(&config.memory_db_path) {
            Ok(store) => {
                info!("🧠 记忆存储: {}", config.memory_db_path);
                MemoryHandle::new(Arc::new(store), thresholds)
            }
            Err(e) => {
                warn!(
                    "⚠️ 无法打开记忆数据库 {}: {}，使用无记忆模式",
                    config.memory_db_path, e
                );
                MemoryHandle::disabled()
            }
        },
        MemoryBackend::Disabled => {
            info!("🧠 记忆存储: 已禁用");
            MemoryHandle::disabled()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_memory_backends() {
        let config = Config {
            memory_backend: MemoryBackend::Disabled,
            ..Config::default()
        };
        assert!(!build_memory(&config).is_enabled());

        let config = Config {
            memory_backend: MemoryBackend::Memory,
            ..Config::default()
        };
        assert!(build_memory(&config).is_enabled());

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            memory_backend: MemoryBackend::Sqlite,
            memory_db_path: dir.path().join("memory.db").to_string_lossy().into_owned(),
            ..Config::default()
        };
        assert!(build_memory(&config).is_enabled());
    }

    #[test]
    fn test_unopenable_sqlite_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            memory_backend: MemoryBackend::Sqlite,
            memory_db_path: dir
                .path()
                .join("missing")
                .join("memory.db")
                .to_string_lossy()
                .into_owned(),
            ..Config::default()
        };
        assert!(!build_memory(&config).is_enabled());
    }
}
