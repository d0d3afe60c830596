//! 页面采集能力
//!
//! 在页面中执行只读脚本，收集可交互元素和可见文本，转换成 [`Snapshot`]。

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ExploreError, Result};
use crate::infrastructure::JsExecutor;
use crate::models::{ElementDescriptor, Point, Snapshot};
use crate::services::price::extract_price_token;
use crate::services::signature::{class_signature, CLASS_SIGNATURE_TOKENS};

/// 单次采集的元素上限
pub const MAX_ELEMENTS: usize = 80;
/// 可见文本上限（字符）；差分和"页面是否变化"都依赖完整文本，提示词另行截断
pub const MAX_VISIBLE_TEXT: usize = 200_000;

const CAPTURE_SCRIPT: &str = r#"
(() => {
    const selectors = [
        'button', '[role="button"]', '[role="radio"]', '[role="checkbox"]', '[role="option"]',
        'a[href]', 'input[type="radio"]', 'input[type="checkbox"]', 'input[type="submit"]',
        'select', 'label', '[onclick]',
        '[class*="card"]', '[class*="option"]', '[class*="choice"]', '[class*="model"]',
        '[class*="selector"]', '[class*="swatch"]',
        '[class*="next"]', '[class*="continue"]', '[class*="submit"]'
    ];
    const seen = new Set();
    const elements = [];
    for (const el of document.querySelectorAll(selectors.join(','))) {
        if (seen.has(el)) continue;
        seen.add(el);
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        const visible = rect.width > 0 && rect.height > 0
            && style.visibility !== 'hidden' && style.display !== 'none'
            && parseFloat(style.opacity || '1') > 0;
        if (!visible) continue;
        const img = el.querySelector('img');
        elements.push({
            tag: el.tagName.toLowerCase(),
            className: typeof el.className === 'string' ? el.className : (el.getAttribute('class') || ''),
            role: el.getAttribute('role'),
            inputType: el.tagName === 'INPUT' ? (el.type || null) : null,
            text: (el.innerText || el.value || el.getAttribute('aria-label') || '').trim().slice(0, 200),
            disabled: !!(el.disabled || el.getAttribute('aria-disabled') === 'true'
                || el.classList.contains('disabled')),
            selected: !!(el.checked || el.selected
                || el.getAttribute('aria-checked') === 'true'
                || el.getAttribute('aria-selected') === 'true'
                || el.getAttribute('aria-pressed') === 'true'),
            x: rect.left + rect.width / 2,
            y: rect.top + rect.height / 2,
            image: img ? (img.currentSrc || img.src || null) : null
        });
        if (elements.length >= __MAX_ELEMENTS__) break;
    }
    return {
        url: location.href,
        visibleText: (document.body ? document.body.innerText : '').slice(0, __MAX_TEXT__),
        elements
    };
})()
"#;

/// 页面脚本返回的原始元素
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawElement {
    pub tag: String,
    pub class_name: String,
    pub role: Option<String>,
    pub input_type: Option<String>,
    pub text: String,
    pub disabled: bool,
    pub selected: bool,
    pub x: f64,
    pub y: f64,
    pub image: Option<String>,
}

/// 页面脚本返回的原始采集结果
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCapture {
    pub url: String,
    pub visible_text: String,
    pub elements: Vec<RawElement>,
}

impl From<RawElement> for ElementDescriptor {
    fn from(raw: RawElement) -> Self {
        let price_text = extract_price_token(&raw.text);
        ElementDescriptor {
            tag: raw.tag.to_lowercase(),
            class_signature: class_signature(&raw.class_name, CLASS_SIGNATURE_TOKENS),
            role: raw.role.filter(|r| !r.is_empty()).map(|r| r.to_lowercase()),
            input_type: raw.input_type.map(|t| t.to_lowercase()),
            text: raw.text,
            visible: true,
            disabled: raw.disabled,
            selected: raw.selected,
            center: Point { x: raw.x, y: raw.y },
            price_text,
            image_ref: raw.image.filter(|s| !s.is_empty()),
        }
    }
}

/// 页面采集器
#[derive(Debug, Clone)]
pub struct PageCapturer {
    /// 是否同时截图（供多模态决策使用）
    pub with_screenshot: bool,
    /// 采集脚本和截图各自的超时
    pub timeout: Duration,
}

impl PageCapturer {
    pub fn new(with_screenshot: bool, timeout: Duration) -> Self {
        Self {
            with_screenshot,
            timeout,
        }
    }

    fn script() -> String {
        CAPTURE_SCRIPT
            .replace("__MAX_ELEMENTS__", &MAX_ELEMENTS.to_string())
            .replace("__MAX_TEXT__", &MAX_VISIBLE_TEXT.to_string())
    }

    /// 采集当前页面；空文档、脚本失败或超时都返回 `CaptureFailure`
    pub async fn capture(&self, executor: &JsExecutor) -> Result<Snapshot> {
        let raw: RawCapture = executor
            .eval_within("capture", Self::script(), self.timeout)
            .await
            .map_err(|e| ExploreError::capture(e.to_string()))?;

        let mut snapshot = Self::build_snapshot(raw)?;

        if self.with_screenshot {
            match executor.screenshot_base64(self.timeout).await {
                Ok(data) => snapshot.screenshot = Some(data),
                // 截图失败不影响结构化采集
                Err(e) => warn!("⚠️ 截图失败: {}", e),
            }
        }

        debug!(
            "采集完成: {} 个元素, {} 字符文本",
            snapshot.elements.len(),
            snapshot.visible_text.len()
        );
        Ok(snapshot)
    }

    pub fn build_snapshot(raw: RawCapture) -> Result<Snapshot> {
        let snapshot = Snapshot {
            url: raw.url,
            visible_text: raw.visible_text,
            elements: raw.elements.into_iter().map(ElementDescriptor::from).collect(),
            screenshot: None,
        };
        if snapshot.is_empty() {
            return Err(ExploreError::capture("页面为空（可能已脱离文档）"));
        }
        Ok(snapshot)
    }
}
