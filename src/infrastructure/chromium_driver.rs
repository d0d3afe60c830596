//! 基于 chromiumoxide 的浏览器驱动

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::ExplorationLimits;
use crate::error::{ExploreError, Result};
use crate::infrastructure::driver::BrowserDriver;
use crate::infrastructure::js_executor::within;
use crate::infrastructure::JsExecutor;
use crate::models::{SelectorPattern, Snapshot};
use crate::services::capture::PageCapturer;

/// 页面内的元素查找函数，`__PATTERN__` 替换为模式 JSON
const FIND_FN: &str = r#"
const __find = (p) => {
    const norm = s => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
    const classes = el => (typeof el.className === 'string' ? el.className : (el.getAttribute('class') || ''))
        .toLowerCase().split(/\s+/);
    const roleOf = el => (el.getAttribute('role') || '').toLowerCase()
        || (el.tagName === 'INPUT' ? (el.type || '').toLowerCase() : null);
    const visible = el => {
        const r = el.getBoundingClientRect();
        const s = window.getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    };
    const disabled = el => !!(el.disabled || el.getAttribute('aria-disabled') === 'true'
        || el.classList.contains('disabled'));
    for (const el of document.querySelectorAll(p.tag)) {
        if (!visible(el) || disabled(el)) continue;
        const cls = classes(el);
        if (!(p.class_signature || []).every(c => cls.includes(c))) continue;
        if (p.role && roleOf(el) !== p.role) continue;
        const text = norm(el.innerText || el.value || el.getAttribute('aria-label'));
        if (p.text_hint && !text.startsWith(p.text_hint)) continue;
        return el;
    }
    return null;
};
"#;

const CLICK_SCRIPT: &str = r#"
(() => {
    __FIND__
    const el = __find(__PATTERN__);
    if (!el) return false;
    el.scrollIntoView({ block: 'center' });
    el.click();
    return true;
})()
"#;

const REVERT_SCRIPT: &str = r#"
(() => {
    __FIND__
    const el = __find(__PATTERN__);
    if (!el) return 'reload';
    const role = (el.getAttribute('role') || '').toLowerCase();
    if ((el.tagName === 'INPUT' && el.type === 'checkbox') || role === 'checkbox' || role === 'switch') {
        el.click();
        return 'toggled';
    }
    if (el.tagName === 'SELECT') {
        el.selectedIndex = 0;
        el.dispatchEvent(new Event('change', { bubbles: true }));
        return 'reset';
    }
    return 'reload';
})()
"#;

/// 移除遮挡交互的浮层、弹窗和 Cookie 提示
const OVERLAY_SCRIPT: &str = r#"
(() => {
    let removed = 0;
    const overlayRe = /(overlay|modal|popup|backdrop|lightbox|dialog)/i;
    const consentRe = /(cookie|gdpr|consent|privacy|notice)/i;
    for (const el of Array.from(document.querySelectorAll('body *'))) {
        if (!el.isConnected) continue;
        const style = window.getComputedStyle(el);
        const z = parseInt(style.zIndex, 10) || 0;
        const positioned = style.position === 'fixed' || style.position === 'absolute';
        const ident = (typeof el.className === 'string' ? el.className : '') + ' ' + (el.id || '');
        if ((positioned && z > 100 && overlayRe.test(ident)) || (positioned && z > 999)
            || (positioned && consentRe.test(ident))) {
            el.remove();
            removed += 1;
        }
    }
    document.body && (document.body.style.overflow = 'auto');
    return removed;
})()
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RevertOutcome {
    Toggled,
    Reset,
    Reload,
}

fn pattern_script(template: &str, pattern: &SelectorPattern) -> Result<String> {
    let pattern_json = serde_json::to_string(pattern)?;
    Ok(template
        .replace("__FIND__", FIND_FN)
        .replace("__PATTERN__", &pattern_json))
}

/// Chromium 页面驱动
///
/// 持有 [`JsExecutor`]（唯一的 page owner），把驱动接口翻译成页面脚本。
pub struct ChromiumDriver {
    executor: JsExecutor,
    capturer: PageCapturer,
    click_timeout: Duration,
    navigation_timeout: Duration,
    settle_delay: Duration,
}

impl ChromiumDriver {
    pub fn new(executor: JsExecutor, limits: &ExplorationLimits, with_screenshot: bool) -> Self {
        Self {
            executor,
            capturer: PageCapturer::new(with_screenshot, limits.capture_timeout),
            click_timeout: limits.click_timeout,
            navigation_timeout: limits.navigation_timeout,
            settle_delay: limits.settle_delay,
        }
    }

    /// 重新加载当前地址，加载后浮层会重新出现，需要再清理一次
    async fn reload(&mut self) -> Result<()> {
        let url = self.executor.url_within(self.click_timeout).await?;
        if url.is_empty() {
            return Err(ExploreError::capture("页面没有地址，无法重新加载"));
        }
        within("reload", self.navigation_timeout, async {
            self.executor.page().goto(url.as_str()).await?;
            Ok::<_, ExploreError>(())
        })
        .await?;
        sleep(self.settle_delay).await;
        self.clear_overlays().await;
        Ok(())
    }

    async fn clear_overlays(&mut self) {
        let removed = self.dismiss_overlays().await.unwrap_or_else(|e| {
            warn!("⚠️ 清理浮层失败: {}", e);
            0
        });
        if removed > 0 {
            debug!("已移除 {} 个浮层", removed);
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        info!("🌐 导航到: {}", url);
        match timeout(self.navigation_timeout, self.executor.page().goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ExploreError::navigation_failed(url, e)),
            Err(_) => {
                return Err(ExploreError::timeout(
                    format!("navigate {}", url),
                    self.navigation_timeout.as_millis() as u64,
                ))
            }
        }
        sleep(self.settle_delay).await;
        self.clear_overlays().await;
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        self.capturer.capture(&self.executor).await
    }

    async fn click(&mut self, pattern: &SelectorPattern) -> Result<bool> {
        let script = pattern_script(CLICK_SCRIPT, pattern)?;
        let clicked: bool = self
            .executor
            .eval_within("click", script, self.click_timeout)
            .await?;
        debug!("点击 {} → {}", pattern, clicked);
        if clicked {
            sleep(self.settle_delay).await;
        }
        Ok(clicked)
    }

    async fn revert(&mut self, pattern: &SelectorPattern) -> Result<()> {
        let script = pattern_script(REVERT_SCRIPT, pattern)?;
        let outcome: RevertOutcome = self
            .executor
            .eval_within("revert", script, self.click_timeout)
            .await?;
        match outcome {
            RevertOutcome::Toggled | RevertOutcome::Reset => {
                sleep(self.settle_delay).await;
                Ok(())
            }
            RevertOutcome::Reload => {
                debug!("撤销 {} 需要重新加载页面", pattern);
                self.reload().await
            }
        }
    }

    async fn dismiss_overlays(&mut self) -> Result<usize> {
        self.executor
            .eval_within("dismiss overlays", OVERLAY_SCRIPT, self.click_timeout)
            .await
    }

    async fn close(&mut self) -> Result<()> {
        self.executor.close_within(self.click_timeout).await
    }
}
