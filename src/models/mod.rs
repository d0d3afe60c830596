pub mod guidance;
pub mod keywords;
pub mod loaders;
pub mod option;
pub mod page;
pub mod pattern;
pub mod target;
pub mod transition;

pub use guidance::{OracleGuidance, OracleOption, SessionContext};
pub use loaders::{load_targets, load_targets_file};
pub use option::ExtractedOption;
pub use page::{ControlKind, ElementDescriptor, PageState, Point, Snapshot, StateId};
pub use pattern::{ActionType, SelectorPattern, StepAction};
pub use target::{ExplorationTarget, TargetFile, DEFAULT_MODEL_NAME};
pub use transition::{ConfidenceThresholds, ContinuePattern, MemoryStats, Transition};
