pub mod exploration_flow;
pub mod session;

pub use exploration_flow::ExplorationFlow;
pub use session::{
    ExplorationOutcome, ExplorationSession, ModelOutcome, SessionStats, TerminationReason,
};
