//! 状态转移记忆
//!
//! 记录 (站点, 页面签名) → 状态，以及状态之间带成功/失败计数的转移，
//! 置信度足够时探索流程直接回放，不再询问决策服务。
//!
//! 存储可在多个会话之间共享，计数更新必须是原子的。

pub mod in_memory;
pub mod sqlite;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::MemoryError;
use crate::models::{
    ConfidenceThresholds, ContinuePattern, MemoryStats, PageState, SelectorPattern, StateId,
    StepAction, Transition,
};

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// 记忆存储接口
#[async_trait]
pub trait TransitionMemory: Send + Sync {
    /// 首次出现时创建，之后返回同一个 ID（终止标记只会被置位）
    async fn upsert_state(
        &self,
        site_domain: &str,
        signature: &str,
        model_context: &str,
        step_index: u32,
        is_terminal: bool,
    ) -> Result<PageState, MemoryError>;

    async fn get_state_by_signature(
        &self,
        site_domain: &str,
        signature: &str,
    ) -> Result<Option<PageState>, MemoryError>;

    /// 对 (from, to, 动作) 这条边计数加一，不存在时创建
    async fn record_transition(
        &self,
        from_state: StateId,
        to_state: StateId,
        action: &StepAction,
        success: bool,
    ) -> Result<(), MemoryError>;

    /// 满足门槛且置信度最高的出边
    async fn get_confident_transition(
        &self,
        from_state: StateId,
        thresholds: ConfidenceThresholds,
    ) -> Result<Option<Transition>, MemoryError>;

    async fn upsert_continue_pattern(
        &self,
        site_domain: &str,
        pattern: &SelectorPattern,
        success: bool,
    ) -> Result<(), MemoryError>;

    async fn get_best_continue_pattern(
        &self,
        site_domain: &str,
        thresholds: ConfidenceThresholds,
    ) -> Result<Option<ContinuePattern>, MemoryError>;

    /// 站点所有"继续"模式，按成功率降序
    async fn list_continue_patterns(
        &self,
        site_domain: &str,
    ) -> Result<Vec<ContinuePattern>, MemoryError>;

    /// 全部或单个站点的统计
    async fn stats(&self, site_domain: Option<&str>) -> Result<MemoryStats, MemoryError>;
}

/// 站点域名：取 host，去掉 `www.` 前缀并转小写
pub fn site_domain(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .map(|h| h.trim_start_matches("www.").to_lowercase())
            .unwrap_or_default(),
        Err(_) => url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or_default()
            .trim_start_matches("www.")
            .to_lowercase(),
    }
}

/// 记忆句柄
///
/// 探索流程使用的门面：存储出错时记录警告并切换为"无记忆"模式，
/// 会话继续依靠决策服务运行，不会因为存储故障中断。
#[derive(Clone)]
pub struct MemoryHandle {
    store: Option<Arc<dyn TransitionMemory>>,
    disabled: Arc<AtomicBool>,
    thresholds: ConfidenceThresholds,
}

impl MemoryHandle {
    pub fn new(store: Arc<dyn TransitionMemory>, thresholds: ConfidenceThresholds) -> Self {
        Self {
            store: Some(store),
            disabled: Arc::new(AtomicBool::new(false)),
            thresholds,
        }
    }

    /// 不使用记忆
    pub fn disabled() -> Self {
        Self {
            store: None,
            disabled: Arc::new(AtomicBool::new(true)),
            thresholds: ConfidenceThresholds::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some() && !self.disabled.load(Ordering::SeqCst)
    }

    pub fn thresholds(&self) -> ConfidenceThresholds {
        self.thresholds
    }

    fn active(&self) -> Option<&Arc<dyn TransitionMemory>> {
        if self.disabled.load(Ordering::SeqCst) {
            None
        } else {
            self.store.as_ref()
        }
    }

    fn degrade<T>(&self, operation: &str, result: Result<T, MemoryError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                if !self.disabled.swap(true, Ordering::SeqCst) {
                    warn!("⚠️ 记忆存储不可用 ({}): {}，切换为无记忆模式", operation, e);
                }
                None
            }
        }
    }

    pub async fn upsert_state(
        &self,
        site_domain: &str,
        signature: &str,
        model_context: &str,
        step_index: u32,
        is_terminal: bool,
    ) -> Option<PageState> {
        let store = self.active()?;
        let result = store
            .upsert_state(site_domain, signature, model_context, step_index, is_terminal)
            .await;
        self.degrade("upsert_state", result)
    }

    /// 只读查询，不创建状态
    pub async fn get_state_by_signature(&self, site_domain: &str, signature: &str) -> Option<PageState> {
        let store = self.active()?;
        let result = store.get_state_by_signature(site_domain, signature).await;
        self.degrade("get_state_by_signature", result).flatten()
    }

    pub async fn record_transition(
        &self,
        from_state: StateId,
        to_state: StateId,
        action: &StepAction,
        success: bool,
    ) -> bool {
        let Some(store) = self.active() else {
            return false;
        };
        let result = store
            .record_transition(from_state, to_state, action, success)
            .await;
        self.degrade("record_transition", result).is_some()
    }

    pub async fn confident_transition(&self, from_state: StateId) -> Option<Transition> {
        let store = self.active()?;
        let result = store
            .get_confident_transition(from_state, self.thresholds)
            .await;
        self.degrade("get_confident_transition", result).flatten()
    }

    pub async fn upsert_continue_pattern(
        &self,
        site_domain: &str,
        pattern: &SelectorPattern,
        success: bool,
    ) {
        if let Some(store) = self.active() {
            let result = store
                .upsert_continue_pattern(site_domain, pattern, success)
                .await;
            self.degrade("upsert_continue_pattern", result);
        }
    }

    /// 达到置信度门槛的最佳"继续"模式
    pub async fn best_continue_pattern(&self, site_domain: &str) -> Option<ContinuePattern> {
        let store = self.active()?;
        let result = store
            .get_best_continue_pattern(site_domain, self.thresholds)
            .await;
        self.degrade("get_best_continue_pattern", result).flatten()
    }

    pub async fn stats(&self, site_domain: Option<&str>) -> Option<MemoryStats> {
        let store = self.active()?;
        let result = store.stats(site_domain).await;
        self.degrade("stats", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_domain_normalization() {
        assert_eq!(site_domain("https://www.Example.com/configure?x=1"), "example.com");
        assert_eq!(site_domain("http://shop.example.com:8080/a"), "shop.example.com");
        assert_eq!(site_domain("www.example.com/a"), "example.com");
    }

    struct FailingStore;

    #[async_trait]
    impl TransitionMemory for FailingStore {
        async fn upsert_state(&self, _: &str, _: &str, _: &str, _: u32, _: bool) -> Result<PageState, MemoryError> {
            Err(MemoryError::Poisoned)
        }
        async fn get_state_by_signature(&self, _: &str, _: &str) -> Result<Option<PageState>, MemoryError> {
            Err(MemoryError::Poisoned)
        }
        async fn record_transition(&self, _: StateId, _: StateId, _: &StepAction, _: bool) -> Result<(), MemoryError> {
            Err(MemoryError::Poisoned)
        }
        async fn get_confident_transition(&self, _: StateId, _: ConfidenceThresholds) -> Result<Option<Transition>, MemoryError> {
            Err(MemoryError::Poisoned)
        }
        async fn upsert_continue_pattern(&self, _: &str, _: &SelectorPattern, _: bool) -> Result<(), MemoryError> {
            Err(MemoryError::Poisoned)
        }
        async fn get_best_continue_pattern(&self, _: &str, _: ConfidenceThresholds) -> Result<Option<ContinuePattern>, MemoryError> {
            Err(MemoryError::Poisoned)
        }
        async fn list_continue_patterns(&self, _: &str) -> Result<Vec<ContinuePattern>, MemoryError> {
            Err(MemoryError::Poisoned)
        }
        async fn stats(&self, _: Option<&str>) -> Result<MemoryStats, MemoryError> {
            Err(MemoryError::Poisoned)
        }
    }

    #[tokio::test]
    async fn test_handle_degrades_on_store_error() {
        let handle = MemoryHandle::new(Arc::new(FailingStore), ConfidenceThresholds::default());
        assert!(handle.is_enabled());
        assert!(handle.upsert_state("example.com", "abc", "default", 0, false).await.is_none());
        assert!(!handle.is_enabled());
        // 之后的调用直接跳过
        assert!(handle.best_continue_pattern("example.com").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_handle_is_noop() {
        let handle = MemoryHandle::disabled();
        assert!(!handle.is_enabled());
        assert!(handle.confident_transition(1).await.is_none());
    }

    #[tokio::test]
    async fn test_best_continue_pattern_skips_unreliable() {
        let handle = MemoryHandle::new(Arc::new(InMemoryStore::new()), ConfidenceThresholds::default());
        let next = SelectorPattern {
            tag: "button".into(),
            class_signature: vec!["btn-next".into()],
            role: None,
            text_hint: Some("continue".into()),
        };
        for _ in 0..10 {
            handle.upsert_continue_pattern("example.com", &next, false).await;
        }
        assert!(handle.best_continue_pattern("example.com").await.is_none());

        let submit = SelectorPattern {
            class_signature: vec!["btn-submit".into()],
            ..next.clone()
        };
        for _ in 0..3 {
            handle.upsert_continue_pattern("example.com", &submit, true).await;
        }
        let best = handle.best_continue_pattern("example.com").await.unwrap();
        assert_eq!(best.pattern, submit);
    }
}
