//! 错误类型
//!
//! 探索引擎内部统一使用 [`ExploreError`]，应用边界（`main` / `App`）使用 `anyhow`。

use thiserror::Error;

/// 探索引擎错误类型
#[derive(Debug, Error)]
pub enum ExploreError {
    /// 页面采集失败（空文档、脚本执行失败等）
    #[error("页面采集失败: {reason}")]
    CaptureFailure { reason: String },

    /// 动作执行失败（所有选择器策略都未能点击）
    #[error("动作执行失败 ({pattern}): {reason}")]
    ActionFailure { pattern: String, reason: String },

    /// 决策服务不可用
    #[error("决策服务不可用: {0}")]
    OracleUnavailable(#[from] OracleError),

    /// 记忆存储不可用
    #[error("记忆存储不可用: {0}")]
    MemoryUnavailable(#[from] MemoryError),

    /// 重复进入同一状态且没有产生新信息
    #[error("检测到循环: 状态 {signature} 没有产生新信息")]
    CycleDetected { signature: String },

    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 单次操作超时
    #[error("操作超时: {operation} ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("JSON解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 启动浏览器失败
    #[error("启动浏览器失败: {reason}")]
    LaunchFailed { reason: String },
    /// 创建页面失败
    #[error("创建页面失败: {source}")]
    PageCreationFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 导航失败
    #[error("导航到 {url} 失败: {source}")]
    NavigationFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 浏览器配置失败
    #[error("浏览器配置失败: {reason}")]
    ConfigurationFailed { reason: String },
}

/// 决策服务（LLM）错误
#[derive(Debug, Error)]
pub enum OracleError {
    /// 未配置决策服务
    #[error("未配置决策服务")]
    NotConfigured,
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {reason}")]
    RequestFailed { model: String, reason: String },
    /// 请求频率限制
    #[error("LLM请求频率限制 (模型: {model})")]
    RateLimited { model: String },
    /// 熔断器打开，暂停调用
    #[error("熔断器已打开，{remaining_secs} 秒后重试")]
    CircuitOpen { remaining_secs: u64 },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyResponse { model: String },
    /// 返回内容无法解析为决策
    #[error("无法解析LLM返回的决策: {reason}")]
    InvalidResponse { reason: String },
    /// 调用超时
    #[error("LLM调用超时 ({timeout_secs}秒)")]
    Timeout { timeout_secs: u64 },
}

/// 记忆存储错误
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("SQLite错误: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("存储锁已损坏")]
    Poisoned,
    #[error("记录序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("无效的存储记录: {0}")]
    InvalidRecord(String),
    #[error("存储任务异常退出: {0}")]
    TaskFailed(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 字段取值非法
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for ExploreError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ExploreError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<rusqlite::Error> for ExploreError {
    fn from(err: rusqlite::Error) -> Self {
        ExploreError::MemoryUnavailable(MemoryError::Sqlite(err))
    }
}

// ========== 便捷构造函数 ==========

impl ExploreError {
    pub fn capture(reason: impl Into<String>) -> Self {
        ExploreError::CaptureFailure {
            reason: reason.into(),
        }
    }

    pub fn action(pattern: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        ExploreError::ActionFailure {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        ExploreError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// 创建浏览器连接错误
    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ExploreError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    /// 创建导航失败错误
    pub fn navigation_failed(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ExploreError::Browser(BrowserError::NavigationFailed {
            url: url.into(),
            source: Box::new(source),
        })
    }

    /// 是否值得在同一步骤内重试一次
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExploreError::CaptureFailure { .. }
                | ExploreError::ActionFailure { .. }
                | ExploreError::Timeout { .. }
                | ExploreError::Browser(BrowserError::ScriptExecutionFailed { .. })
        )
    }
}

// ========== Result 类型别名 ==========

/// 探索引擎结果类型
pub type Result<T> = std::result::Result<T, ExploreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ExploreError::capture("empty document").is_retryable());
        assert!(ExploreError::timeout("click", 3000).is_retryable());
        assert!(!ExploreError::CycleDetected {
            signature: "abc".into()
        }
        .is_retryable());
        assert!(!ExploreError::OracleUnavailable(OracleError::NotConfigured).is_retryable());
    }

    #[test]
    fn test_error_display_is_localized() {
        let err = ExploreError::action("button.next", "no visible match");
        assert_eq!(
            err.to_string(),
            "动作执行失败 (button.next): no visible match"
        );
    }
}
