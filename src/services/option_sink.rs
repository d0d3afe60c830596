//! 选项输出 - 业务能力层
//!
//! 只负责"把抽取到的选项写出去"，不关心探索流程

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::models::ExtractedOption;

/// 选项输出接口
#[async_trait]
pub trait OptionSink: Send + Sync {
    /// 写出一个目标的一批选项
    async fn write(&self, target_url: &str, options: &[ExtractedOption]) -> Result<()>;
}

/// JSON Lines 中的一行
#[derive(Serialize)]
struct OptionRecord<'a> {
    target: &'a str,
    #[serde(flatten)]
    option: &'a ExtractedOption,
}

/// 以 JSON Lines 追加写入文件
pub struct JsonLinesSink {
    file_path: String,
}

impl JsonLinesSink {
    pub fn new() -> Self {
        Self {
            file_path: "options.jsonl".to_string(),
        }
    }

    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            file_path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.file_path
    }
}

impl Default for JsonLinesSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OptionSink for JsonLinesSink {
    async fn write(&self, target_url: &str, options: &[ExtractedOption]) -> Result<()> {
        if options.is_empty() {
            return Ok(());
        }
        debug!("写入 {} 条选项: {} → {}", options.len(), target_url, self.file_path);

        let mut buffer = String::new();
        for option in options {
            buffer.push_str(&serde_json::to_string(&OptionRecord {
                target: target_url,
                option,
            })?);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        file.write_all(buffer.as_bytes())?;
        Ok(())
    }
}

/// 保存在内存中的输出，测试和嵌入调用使用
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, ExtractedOption)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, ExtractedOption)> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl OptionSink for MemorySink {
    async fn write(&self, target_url: &str, options: &[ExtractedOption]) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.extend(
            options
                .iter()
                .cloned()
                .map(|option| (target_url.to_string(), option)),
        );
        Ok(())
    }
}

/// 把一个目标的运行报告写成格式化 JSON
pub fn write_report<T: Serialize>(path: impl AsRef<Path>, report: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    debug!("运行报告已保存: {}", path.display());
    Ok(())
}
