//! 进程内记忆存储

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::MemoryError;
use crate::models::transition::pick_confident;
use crate::models::{
    ConfidenceThresholds, ContinuePattern, MemoryStats, PageState, SelectorPattern, StateId,
    StepAction, Transition,
};
use crate::services::memory::TransitionMemory;

#[derive(Default)]
struct Inner {
    next_state_id: StateId,
    states: HashMap<(String, String), PageState>,
    /// (from, to, 动作键)
    transitions: HashMap<(StateId, StateId, String), Transition>,
    /// (站点, 模式键)
    continue_patterns: HashMap<(String, String), ContinuePattern>,
}

/// 基于 `Mutex<HashMap>` 的存储，所有读改写都在同一把锁内完成
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, MemoryError> {
        self.inner.lock().map_err(|_| MemoryError::Poisoned)
    }
}

fn sorted_patterns(mut patterns: Vec<ContinuePattern>) -> Vec<ContinuePattern> {
    patterns.sort_by(|a, b| {
        b.success_rate()
            .total_cmp(&a.success_rate())
            .then(b.seen_count.cmp(&a.seen_count))
    });
    patterns
}

#[async_trait]
impl TransitionMemory for InMemoryStore {
    async fn upsert_state(
        &self,
        site_domain: &str,
        signature: &str,
        model_context: &str,
        step_index: u32,
        is_terminal: bool,
    ) -> Result<PageState, MemoryError> {
        let mut inner = self.lock()?;
        let key = (site_domain.to_string(), signature.to_string());
        if let Some(state) = inner.states.get_mut(&key) {
            state.model_context = model_context.to_string();
            state.step_index = step_index;
            state.is_terminal |= is_terminal;
            return Ok(state.clone());
        }

        inner.next_state_id += 1;
        let state = PageState {
            id: inner.next_state_id,
            site_domain: site_domain.to_string(),
            signature: signature.to_string(),
            model_context: model_context.to_string(),
            step_index,
            is_terminal,
        };
        inner.states.insert(key, state.clone());
        Ok(state)
    }

    async fn get_state_by_signature(
        &self,
        site_domain: &str,
        signature: &str,
    ) -> Result<Option<PageState>, MemoryError> {
        let inner = self.lock()?;
        Ok(inner
            .states
            .get(&(site_domain.to_string(), signature.to_string()))
            .cloned())
    }

    async fn record_transition(
        &self,
        from_state: StateId,
        to_state: StateId,
        action: &StepAction,
        success: bool,
    ) -> Result<(), MemoryError> {
        let mut inner = self.lock()?;
        let transition = inner
            .transitions
            .entry((from_state, to_state, action.action_key()))
            .or_insert_with(|| Transition {
                from_state,
                to_state,
                action: action.clone(),
                success_count: 0,
                failure_count: 0,
                last_used: Utc::now(),
            });
        if success {
            transition.success_count += 1;
        } else {
            transition.failure_count += 1;
        }
        transition.last_used = Utc::now();
        Ok(())
    }

    async fn get_confident_transition(
        &self,
        from_state: StateId,
        thresholds: ConfidenceThresholds,
    ) -> Result<Option<Transition>, MemoryError> {
        let inner = self.lock()?;
        let candidates = inner
            .transitions
            .values()
            .filter(|t| t.from_state == from_state);
        Ok(pick_confident(candidates, thresholds).cloned())
    }

    async fn upsert_continue_pattern(
        &self,
        site_domain: &str,
        pattern: &SelectorPattern,
        success: bool,
    ) -> Result<(), MemoryError> {
        let mut inner = self.lock()?;
        let entry = inner
            .continue_patterns
            .entry((site_domain.to_string(), pattern.structural_key()))
            .or_insert_with(|| ContinuePattern {
                site_domain: site_domain.to_string(),
                pattern: pattern.clone(),
                seen_count: 0,
                success_count: 0,
            });
        entry.seen_count += 1;
        if success {
            entry.success_count += 1;
        }
        Ok(())
    }

    async fn get_best_continue_pattern(
        &self,
        site_domain: &str,
        thresholds: ConfidenceThresholds,
    ) -> Result<Option<ContinuePattern>, MemoryError> {
        let patterns = self.list_continue_patterns(site_domain).await?;
        Ok(patterns
            .into_iter()
            .find(|p| thresholds.accepts(p.success_count, p.seen_count)))
    }

    async fn list_continue_patterns(
        &self,
        site_domain: &str,
    ) -> Result<Vec<ContinuePattern>, MemoryError> {
        let inner = self.lock()?;
        let patterns = inner
            .continue_patterns
            .values()
            .filter(|p| p.site_domain == site_domain)
            .cloned()
            .collect();
        Ok(sorted_patterns(patterns))
    }

    async fn stats(&self, site_domain: Option<&str>) -> Result<MemoryStats, MemoryError> {
        let inner = self.lock()?;
        let Some(site) = site_domain else {
            return Ok(MemoryStats {
                states: inner.states.len(),
                transitions: inner.transitions.len(),
                continue_patterns: inner.continue_patterns.len(),
            });
        };
        let state_ids: Vec<StateId> = inner
            .states
            .values()
            .filter(|s| s.site_domain == site)
            .map(|s| s.id)
            .collect();
        Ok(MemoryStats {
            states: state_ids.len(),
            transitions: inner
                .transitions
                .values()
                .filter(|t| state_ids.contains(&t.from_state))
                .count(),
            continue_patterns: inner
                .continue_patterns
                .values()
                .filter(|p| p.site_domain == site)
                .count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn advance(hint: &str) -> StepAction {
        StepAction::Advance {
            advance: SelectorPattern {
                tag: "button".into(),
                class_signature: vec!["btn-next".into()],
                role: None,
                text_hint: Some(hint.into()),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_state_is_idempotent() {
        let store = InMemoryStore::new();
        let a = store.upsert_state("example.com", "abc", "Model A", 0, false).await.unwrap();
        let b = store.upsert_state("example.com", "abc", "Model B", 2, false).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.model_context, "Model B");

        let other_site = store.upsert_state("other.com", "abc", "Model A", 0, false).await.unwrap();
        assert_ne!(a.id, other_site.id);
        assert_eq!(store.stats(None).await.unwrap().states, 2);
    }

    #[tokio::test]
    async fn test_terminal_flag_is_sticky() {
        let store = InMemoryStore::new();
        store.upsert_state("example.com", "end", "A", 3, true).await.unwrap();
        let again = store.upsert_state("example.com", "end", "B", 3, false).await.unwrap();
        assert!(again.is_terminal);
    }

    #[tokio::test]
    async fn test_confident_transition_after_min_seen() {
        let store = InMemoryStore::new();
        let thresholds = ConfidenceThresholds::default();
        let action = advance("next");

        store.record_transition(1, 2, &action, true).await.unwrap();
        assert!(store.get_confident_transition(1, thresholds).await.unwrap().is_none());
        store.record_transition(1, 2, &action, true).await.unwrap();
        store.record_transition(1, 2, &action, true).await.unwrap();

        let best = store.get_confident_transition(1, thresholds).await.unwrap().unwrap();
        assert_eq!(best.to_state, 2);
        assert_eq!(best.seen_count(), 3);
    }

    #[tokio::test]
    async fn test_failures_lower_confidence() {
        let store = InMemoryStore::new();
        let thresholds = ConfidenceThresholds::default();
        let action = advance("next");
        for _ in 0..3 {
            store.record_transition(1, 2, &action, true).await.unwrap();
        }
        store.record_transition(1, 2, &action, false).await.unwrap();
        // 3/4 = 0.75 < 0.8
        assert!(store.get_confident_transition(1, thresholds).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let action = advance("next");
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            let action = action.clone();
            handles.push(tokio::spawn(async move {
                store.record_transition(1, 2, &action, true).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let best = store
            .get_confident_transition(1, ConfidenceThresholds::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.success_count, 50);
    }

    #[tokio::test]
    async fn test_continue_pattern_ranking() {
        let store = InMemoryStore::new();
        let good = SelectorPattern {
            tag: "button".into(),
            class_signature: vec!["btn-next".into()],
            role: None,
            text_hint: Some("next".into()),
        };
        let bad = SelectorPattern {
            text_hint: Some("continue".into()),
            ..good.clone()
        };
        for _ in 0..3 {
            store.upsert_continue_pattern("example.com", &good, true).await.unwrap();
            store.upsert_continue_pattern("example.com", &bad, false).await.unwrap();
        }

        let listed = store.list_continue_patterns("example.com").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].pattern, good);

        let best = store
            .get_best_continue_pattern("example.com", ConfidenceThresholds::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.pattern, good);
        assert!(store
            .get_best_continue_pattern("other.com", ConfidenceThresholds::default())
            .await
            .unwrap()
            .is_none());
    }
}
