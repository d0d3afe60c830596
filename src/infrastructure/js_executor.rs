//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"执行 JS"和截图的能力

use std::future::Future;
use std::time::Duration;

use base64::Engine;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{ExploreError, Result};

/// 给一次页面调用加上截止时间，超时返回 [`ExploreError::Timeout`]
pub async fn within<T>(
    operation: &str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ExploreError::timeout(operation, limit.as_millis() as u64))?
}

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力
/// - 不认识选项 / 工作流
/// - 不处理探索流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（导航、关闭等操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 带超时执行
    pub async fn eval_within<T: DeserializeOwned>(
        &self,
        operation: &str,
        js_code: impl Into<String>,
        timeout: Duration,
    ) -> Result<T> {
        within(operation, timeout, self.eval_as(js_code)).await
    }

    /// 当前视口截图（base64 PNG）
    pub async fn screenshot_base64(&self, timeout: Duration) -> Result<String> {
        let bytes = within("screenshot", timeout, async {
            let bytes = self
                .page
                .screenshot(ScreenshotParams::builder().build())
                .await?;
            Ok::<_, ExploreError>(bytes)
        })
        .await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// 当前页面地址
    pub async fn url_within(&self, timeout: Duration) -> Result<String> {
        within("page url", timeout, async {
            let url = self.page.url().await?;
            Ok::<_, ExploreError>(url.unwrap_or_default())
        })
        .await
    }

    /// 关闭页面
    pub async fn close_within(&self, timeout: Duration) -> Result<()> {
        within("close page", timeout, async {
            self.page.clone().close().await?;
            Ok::<_, ExploreError>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_times_out_hung_call() {
        let hung = std::future::pending::<Result<()>>();
        let err = within("capture", Duration::from_millis(20), hung)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExploreError::Timeout { ref operation, timeout_ms: 20 } if operation == "capture"
        ));
    }

    #[tokio::test]
    async fn test_within_passes_through_result() {
        let value = within("eval", Duration::from_secs(1), async { Ok::<_, ExploreError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
