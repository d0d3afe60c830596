//! 状态转移与"继续"按钮模式的学习记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::page::StateId;
use crate::models::pattern::{ActionType, SelectorPattern, StepAction};

/// 可回放的置信度门槛
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub min_success_rate: f64,
    pub min_seen_count: u32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.8,
            min_seen_count: 3,
        }
    }
}

impl ConfidenceThresholds {
    pub fn accepts(&self, success_count: u32, seen_count: u32) -> bool {
        seen_count >= self.min_seen_count
            && seen_count > 0
            && success_rate(success_count, seen_count) >= self.min_success_rate
    }
}

pub fn success_rate(success_count: u32, seen_count: u32) -> f64 {
    if seen_count == 0 {
        0.0
    } else {
        f64::from(success_count) / f64::from(seen_count)
    }
}

/// 记忆中的一条状态转移
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from_state: StateId,
    pub to_state: StateId,
    pub action: StepAction,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_used: DateTime<Utc>,
}

impl Transition {
    pub fn action_type(&self) -> ActionType {
        self.action.action_type()
    }

    pub fn seen_count(&self) -> u32 {
        self.success_count + self.failure_count
    }

    pub fn confidence(&self) -> f64 {
        success_rate(self.success_count, self.seen_count())
    }
}

/// 站点级"继续"按钮模式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuePattern {
    pub site_domain: String,
    pub pattern: SelectorPattern,
    pub seen_count: u32,
    pub success_count: u32,
}

impl ContinuePattern {
    pub fn success_rate(&self) -> f64 {
        success_rate(self.success_count, self.seen_count)
    }
}

/// 记忆统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub states: usize,
    pub transitions: usize,
    pub continue_patterns: usize,
}

/// 在候选转移中选出可回放的最佳一条
///
/// 置信度最高者优先，其次观察次数多者，再次最近使用者。
pub fn pick_confident<'a>(
    candidates: impl IntoIterator<Item = &'a Transition>,
    thresholds: ConfidenceThresholds,
) -> Option<&'a Transition> {
    candidates
        .into_iter()
        .filter(|t| thresholds.accepts(t.success_count, t.seen_count()))
        .max_by(|a, b| {
            a.confidence()
                .total_cmp(&b.confidence())
                .then(a.seen_count().cmp(&b.seen_count()))
                .then(a.last_used.cmp(&b.last_used))
        })
}
