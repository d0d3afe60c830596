//! 决策服务熔断器

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::OracleError;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// 连续失败达到阈值后打开，冷却期内直接拒绝调用
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// 冷却期内返回 `CircuitOpen`；冷却结束后放行（半开）
    pub fn check(&self) -> Result<(), OracleError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(until) = state.open_until {
            let now = Instant::now();
            if now < until {
                return Err(OracleError::CircuitOpen {
                    remaining_secs: (until - now).as_secs().max(1),
                });
            }
            state.open_until = None;
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            warn!(
                "🔌 决策服务连续失败 {} 次，熔断 {} 秒",
                state.consecutive_failures,
                self.cooldown.as_secs()
            );
            state.open_until = Some(Instant::now() + self.cooldown);
            state.consecutive_failures = 0;
        }
    }

    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }
}
