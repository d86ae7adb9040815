//! 执行跟踪：执行记录、注册表（带过期定时器）、完成信号关联、完成历史

pub mod correlation;
pub mod history;
pub mod intake;
pub mod record;
pub mod registry;

pub use correlation::{
    CorrelationConfig, CorrelationEngine, CorrelationOutcome, MatchTier, UnmatchedReason,
};
pub use history::{
    ChannelObserver, CompletionRecord, HistoryObserver, HistoryQuery, HistorySink, HistoryStats,
    InMemoryHistory, Resolution,
};
pub use intake::{Acknowledgement, CompletionIntake, IntakeError};
pub use record::{CompletionSignal, ExecutionRecord, ExecutionStatus, SignalMetadata, SignalStatus};
pub use registry::{ExecutionRegistry, DEFAULT_TTL};
