use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::ConfidenceThresholds;

/// 记忆存储后端
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// 进程内存储，进程退出即丢失
    Memory,
    /// 本地 SQLite 文件
    Sqlite,
    /// 不使用记忆
    Disabled,
}

impl std::str::FromStr for MemoryBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(MemoryBackend::Memory),
            "sqlite" => Ok(MemoryBackend::Sqlite),
            "disabled" | "none" | "off" => Ok(MemoryBackend::Disabled),
            other => Err(ConfigError::EnvVarParseFailed {
                var_name: "MEMORY_BACKEND".to_string(),
                value: other.to_string(),
                expected_type: "memory|sqlite|disabled".to_string(),
            }),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 浏览器 ---
    /// 浏览器调试端口，0 表示自行启动无头浏览器
    pub browser_debug_port: u16,
    pub headless: bool,
    /// 自定义浏览器可执行文件
    pub chrome_executable: Option<String>,

    // --- 决策服务（LLM） ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub oracle_timeout_secs: u64,
    pub oracle_max_retries: u32,
    /// 连续失败多少次后熔断
    pub oracle_failure_threshold: u32,
    pub oracle_cooldown_secs: u64,

    // --- 记忆存储 ---
    pub memory_backend: MemoryBackend,
    pub memory_db_path: String,
    pub min_success_rate: f64,
    pub min_seen_count: u32,

    // --- 会话预算 ---
    pub max_iterations: u32,
    pub session_time_budget_secs: u64,
    pub click_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    /// 单次页面采集（脚本 + 截图）的超时
    pub capture_timeout_ms: u64,
    /// 每次动作后等待页面稳定的时间
    pub settle_delay_ms: u64,
    pub max_consecutive_failures: u32,
    /// 同时探索的目标数量
    pub max_concurrent_sessions: usize,

    // --- DOM 差分探索 ---
    pub max_clicks_per_page: usize,
    pub max_recursion_depth: usize,
    pub dom_diff_time_budget_secs: u64,

    // --- 输入输出 ---
    /// 目标列表（TOML 文件或目录）
    pub targets_file: String,
    /// 选项输出（JSON Lines）
    pub options_output_file: String,
    /// 每个目标的运行报告目录
    pub reports_dir: String,
    /// 运行日志
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_debug_port: 0,
            headless: true,
            chrome_executable: None,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            oracle_timeout_secs: 60,
            oracle_max_retries: 3,
            oracle_failure_threshold: 5,
            oracle_cooldown_secs: 60,
            memory_backend: MemoryBackend::Sqlite,
            memory_db_path: "explorer_memory.db".to_string(),
            min_success_rate: 0.8,
            min_seen_count: 3,
            max_iterations: 50,
            session_time_budget_secs: 600,
            click_timeout_ms: 3000,
            navigation_timeout_ms: 30_000,
            capture_timeout_ms: 10_000,
            settle_delay_ms: 1500,
            max_consecutive_failures: 3,
            max_concurrent_sessions: 4,
            max_clicks_per_page: 30,
            max_recursion_depth: 3,
            dom_diff_time_budget_secs: 20,
            targets_file: "targets.toml".to_string(),
            options_output_file: "options.jsonl".to_string(),
            reports_dir: "reports".to_string(),
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载配置，环境变量优先于文件
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(self) -> Self {
        let d = self;
        Self {
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT", d.browser_debug_port),
            headless: env_parse("HEADLESS", d.headless),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(d.chrome_executable),
            llm_api_key: env_string("LLM_API_KEY", d.llm_api_key),
            llm_api_base_url: env_string("LLM_API_BASE_URL", d.llm_api_base_url),
            llm_model_name: env_string("LLM_MODEL_NAME", d.llm_model_name),
            oracle_timeout_secs: env_parse("ORACLE_TIMEOUT_SECS", d.oracle_timeout_secs),
            oracle_max_retries: env_parse("ORACLE_MAX_RETRIES", d.oracle_max_retries),
            oracle_failure_threshold: env_parse("ORACLE_FAILURE_THRESHOLD", d.oracle_failure_threshold),
            oracle_cooldown_secs: env_parse("ORACLE_COOLDOWN_SECS", d.oracle_cooldown_secs),
            memory_backend: env_parse("MEMORY_BACKEND", d.memory_backend),
            memory_db_path: env_string("MEMORY_DB_PATH", d.memory_db_path),
            min_success_rate: env_parse("MIN_SUCCESS_RATE", d.min_success_rate),
            min_seen_count: env_parse("MIN_SEEN_COUNT", d.min_seen_count),
            max_iterations: env_parse("MAX_ITERATIONS", d.max_iterations),
            session_time_budget_secs: env_parse("SESSION_TIME_BUDGET_SECS", d.session_time_budget_secs),
            click_timeout_ms: env_parse("CLICK_TIMEOUT_MS", d.click_timeout_ms),
            navigation_timeout_ms: env_parse("NAVIGATION_TIMEOUT_MS", d.navigation_timeout_ms),
            capture_timeout_ms: env_parse("CAPTURE_TIMEOUT_MS", d.capture_timeout_ms),
            settle_delay_ms: env_parse("SETTLE_DELAY_MS", d.settle_delay_ms),
            max_consecutive_failures: env_parse("MAX_CONSECUTIVE_FAILURES", d.max_consecutive_failures),
            max_concurrent_sessions: env_parse("MAX_CONCURRENT_SESSIONS", d.max_concurrent_sessions),
            max_clicks_per_page: env_parse("MAX_CLICKS_PER_PAGE", d.max_clicks_per_page),
            max_recursion_depth: env_parse("MAX_RECURSION_DEPTH", d.max_recursion_depth),
            dom_diff_time_budget_secs: env_parse("DOM_DIFF_TIME_BUDGET_SECS", d.dom_diff_time_budget_secs),
            targets_file: env_string("TARGETS_FILE", d.targets_file),
            options_output_file: env_string("OPTIONS_OUTPUT_FILE", d.options_output_file),
            reports_dir: env_string("REPORTS_DIR", d.reports_dir),
            output_log_file: env_string("OUTPUT_LOG_FILE", d.output_log_file),
            verbose_logging: env_parse("VERBOSE_LOGGING", d.verbose_logging),
        }
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_success_rate) {
            return Err(ConfigError::Invalid {
                field: "min_success_rate".to_string(),
                reason: format!("{} 不在 [0, 1] 范围内", self.min_success_rate),
            });
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_sessions".to_string(),
                reason: "至少为 1".to_string(),
            });
        }
        Ok(())
    }

    /// 是否配置了决策服务
    pub fn oracle_enabled(&self) -> bool {
        !self.llm_api_key.trim().is_empty()
    }

    pub fn memory_thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            min_success_rate: self.min_success_rate,
            min_seen_count: self.min_seen_count,
        }
    }

    pub fn exploration_limits(&self) -> ExplorationLimits {
        ExplorationLimits {
            max_iterations: self.max_iterations,
            time_budget: Duration::from_secs(self.session_time_budget_secs),
            click_timeout: Duration::from_millis(self.click_timeout_ms),
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            capture_timeout: Duration::from_millis(self.capture_timeout_ms),
            oracle_timeout: Duration::from_secs(self.oracle_timeout_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            ..ExplorationLimits::default()
        }
    }

    pub fn dom_diff_limits(&self) -> DomDiffLimits {
        DomDiffLimits {
            max_clicks_per_page: self.max_clicks_per_page,
            max_recursion_depth: self.max_recursion_depth,
            time_budget: Duration::from_secs(self.dom_diff_time_budget_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms.min(1000)),
        }
    }
}

/// 单个探索会话的预算
#[derive(Clone, Debug)]
pub struct ExplorationLimits {
    pub max_iterations: u32,
    pub time_budget: Duration,
    pub click_timeout: Duration,
    pub navigation_timeout: Duration,
    pub capture_timeout: Duration,
    pub oracle_timeout: Duration,
    pub settle_delay: Duration,
    pub max_consecutive_failures: u32,
    /// 页面无变化时，不经决策服务直接重试"继续"按钮的次数
    pub max_stagnation_retries: u32,
    /// 同一状态在没有新信息时允许重复进入的次数
    pub max_state_revisits: u32,
}

impl Default for ExplorationLimits {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            time_budget: Duration::from_secs(600),
            click_timeout: Duration::from_millis(3000),
            navigation_timeout: Duration::from_secs(30),
            capture_timeout: Duration::from_secs(10),
            oracle_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_millis(1500),
            max_consecutive_failures: 3,
            max_stagnation_retries: 2,
            max_state_revisits: 2,
        }
    }
}

/// DOM 差分探索的预算
#[derive(Clone, Debug)]
pub struct DomDiffLimits {
    pub max_clicks_per_page: usize,
    pub max_recursion_depth: usize,
    pub time_budget: Duration,
    pub settle_delay: Duration,
}

impl Default for DomDiffLimits {
    fn default() -> Self {
        Self {
            max_clicks_per_page: 30,
            max_recursion_depth: 3,
            time_budget: Duration::from_secs(20),
            settle_delay: Duration::from_millis(1000),
        }
    }
}
