//! 决策服务（Oracle）
//!
//! 看一页快照，给出新选项、推荐动作和是否结束。实现可以是 LLM，也可以是测试脚本。

pub mod breaker;
pub mod llm;
pub mod response;

use async_trait::async_trait;

use crate::error::OracleError;
use crate::models::{OracleGuidance, SessionContext, Snapshot};

pub use breaker::CircuitBreaker;
pub use llm::LlmOracle;

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn consult(
        &self,
        snapshot: &Snapshot,
        ctx: &SessionContext,
    ) -> Result<OracleGuidance, OracleError>;
}
