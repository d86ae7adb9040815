//! Bee Relay - Agent 协议分发与执行关联
//!
//! 模块划分：
//! - **agent**: Agent trait、类型化操作表、注册表与内置 Agent（echo / assistant）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、服务生命周期、优雅关闭
//! - **execution**: 执行注册表（带过期定时器）、完成信号关联引擎、完成历史
//! - **observability**: tracing 初始化
//! - **protocol**: Request / Response 信封、分发器、NDJSON 命令流

pub mod agent;
pub mod config;
pub mod core;
pub mod execution;
pub mod observability;
pub mod protocol;

pub use crate::core::RelayService;
pub use execution::{CompletionSignal, CorrelationOutcome, ExecutionRecord, ExecutionStatus};
pub use protocol::{Request, Response};
