//! 协议错误与注册表错误
//!
//! ProtocolError 只会出现在 Response.error 中，分发器边界之外永远不抛出；
//! RegistryError 属于调用方的编程错误（如重复的 execution id），由 register 等接口直接返回。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC 风格的错误码
pub mod codes {
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const AGENT_INACTIVE: i64 = -32001;
    pub const AGENT_NOT_FOUND: i64 = -32002;
}

/// 分发过程中可能出现的协议错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Method not found: {agent}.{method}")]
    MethodNotFound { agent: String, method: String },

    #[error("Agent inactive: {0}")]
    AgentInactive(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// 操作失败或 panic；原始信息保存在 data 中
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ProtocolError {
    pub fn code(&self) -> i64 {
        match self {
            ProtocolError::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            ProtocolError::AgentInactive(_) => codes::AGENT_INACTIVE,
            ProtocolError::AgentNotFound(_) => codes::AGENT_NOT_FOUND,
            ProtocolError::InvalidParams(_) => codes::INVALID_PARAMS,
            ProtocolError::InternalError(_) => codes::INTERNAL_ERROR,
        }
    }

    /// 转为线上的错误对象
    pub fn to_wire(&self) -> ErrorObject {
        let data = match self {
            ProtocolError::MethodNotFound { agent, method } => {
                Some(serde_json::json!({ "agent": agent, "method": method }))
            }
            ProtocolError::AgentInactive(agent) | ProtocolError::AgentNotFound(agent) => {
                Some(serde_json::json!({ "agent": agent }))
            }
            ProtocolError::InvalidParams(detail) | ProtocolError::InternalError(detail) => {
                Some(serde_json::Value::String(detail.clone()))
            }
        };
        let message = match self {
            ProtocolError::MethodNotFound { .. } => "Method not found",
            ProtocolError::AgentInactive(_) => "Agent inactive",
            ProtocolError::AgentNotFound(_) => "Agent not found",
            ProtocolError::InvalidParams(_) => "Invalid params",
            ProtocolError::InternalError(_) => "Internal error",
        };
        ErrorObject {
            code: self.code(),
            message: message.to_string(),
            data,
        }
    }
}

/// Response.error 的线上格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// 执行注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate execution id: {0}")]
    DuplicateExecutionId(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Execution registry has been shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_codes() {
        let err = ProtocolError::MethodNotFound {
            agent: "echo".into(),
            method: "nope".into(),
        };
        assert_eq!(err.code(), codes::METHOD_NOT_FOUND);
        assert_eq!(ProtocolError::AgentInactive("a".into()).code(), -32001);
        assert_eq!(ProtocolError::InternalError("boom".into()).code(), -32603);
    }

    #[test]
    fn test_internal_error_keeps_message_as_data() {
        let wire = ProtocolError::InternalError("disk on fire".into()).to_wire();
        assert_eq!(wire.message, "Internal error");
        assert_eq!(wire.data, Some(serde_json::json!("disk on fire")));
    }
}
