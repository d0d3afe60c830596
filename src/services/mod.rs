//! 业务能力层
//!
//! 每个服务只负责一种能力，不关心探索流程顺序

pub mod capture;
pub mod dom_diff;
pub mod learner;
pub mod memory;
pub mod option_sink;
pub mod oracle;
pub mod price;
pub mod signature;

pub use capture::PageCapturer;
pub use dom_diff::{DomDiffExplorer, DomDiffReport};
pub use learner::{WorkflowLearner, WorkflowStep};
pub use memory::{InMemoryStore, MemoryHandle, SqliteStore, TransitionMemory};
pub use option_sink::{JsonLinesSink, MemorySink, OptionSink};
pub use oracle::{CircuitBreaker, DecisionOracle, LlmOracle};
pub use signature::compute_signature;
