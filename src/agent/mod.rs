//! Agent：具名、带版本的操作集合
//!
//! - **traits**: Agent / TypedAgent / Operation，类型化操作表
//! - **registry**: AgentRegistry 与激活状态
//! - **echo** / **assistant**: 内置 Agent

pub mod assistant;
pub mod echo;
pub mod registry;
pub mod traits;

pub use assistant::{AssistantAgent, AssistantOp};
pub use echo::{EchoAgent, EchoOp};
pub use registry::{AgentHandle, AgentRegistry, DuplicateAgent};
pub use traits::{
    describe_operations, parse_params, Agent, AgentDescriptor, Operation, OperationError,
    TypedAgent, TypedAgentAdapter,
};
