use std::path::Path;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{BrowserError, ExploreError, Result};

/// 启动浏览器（默认无头模式）
pub async fn launch_browser(headless: bool, chrome_executable: Option<&str>) -> Result<Browser> {
    info!("🚀 启动{}浏览器...", if headless { "无头" } else { "" });

    let mut builder = BrowserConfig::builder();
    builder = if headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };
    if let Some(executable) = chrome_executable {
        debug!("浏览器可执行文件: {}", executable);
        builder = builder.chrome_executable(Path::new(executable));
    }

    let config = builder
        .args(vec![
            "--disable-gpu",
            "--no-sandbox",               // 容器内没有沙盒权限
            "--disable-dev-shm-usage",    // 防止共享内存不足
            "--window-size=1440,900",
        ])
        .build()
        .map_err(|e| {
            error!("配置浏览器失败: {}", e);
            BrowserError::ConfigurationFailed { reason: e }
        })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        ExploreError::Browser(BrowserError::LaunchFailed {
            reason: e.to_string(),
        })
    })?;
    debug!("浏览器启动成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    info!("✅ 浏览器已启动");
    Ok(browser)
}
