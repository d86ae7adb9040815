//! Agent trait 与类型化操作表
//!
//! 每个 Agent 用一个 Operation 枚举声明自己支持的操作，execute 中对枚举做穷尽 match；
//! TypedAgentAdapter 把它擦除成 `dyn Agent`，分发器只在边界处做一次字符串 → 枚举的解析。

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Agent 描述：名称唯一，注册后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub version: String,
    pub operations: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl AgentDescriptor {
    pub fn supports(&self, method: &str) -> bool {
        self.operations.contains(method)
    }
}

/// 操作执行失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

/// 某个 Agent 的操作枚举
pub trait Operation: Copy + Send + Sync + 'static {
    /// 全部操作（决定 AgentDescriptor.operations）
    const ALL: &'static [Self];

    /// 线上的方法名
    fn name(self) -> &'static str;

    /// 参数的 JSON Schema
    fn params_schema(self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    fn parse(method: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == method)
    }
}

/// 类型化 Agent：实现方只需处理自己的 Operation 枚举
#[async_trait]
pub trait TypedAgent: Send + Sync {
    type Op: Operation;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn metadata(&self) -> Value {
        Value::Object(Default::default())
    }

    async fn execute(&self, op: Self::Op, params: Value) -> Result<Value, OperationError>;
}

/// 分发器看到的对象安全 Agent
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn supports(&self, method: &str) -> bool {
        self.descriptor().supports(method)
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value, OperationError>;
}

/// TypedAgent → dyn Agent
pub struct TypedAgentAdapter<A: TypedAgent> {
    agent: A,
    descriptor: AgentDescriptor,
}

impl<A: TypedAgent> TypedAgentAdapter<A> {
    pub fn new(agent: A) -> Self {
        let descriptor = AgentDescriptor {
            name: agent.name().to_string(),
            version: agent.version().to_string(),
            operations: <A::Op as Operation>::ALL
                .iter()
                .map(|op| op.name().to_string())
                .collect(),
            metadata: agent.metadata(),
        };
        Self { agent, descriptor }
    }

    pub fn inner(&self) -> &A {
        &self.agent
    }
}

#[async_trait]
impl<A: TypedAgent> Agent for TypedAgentAdapter<A> {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value, OperationError> {
        let op = <A::Op as Operation>::parse(method)
            .ok_or_else(|| OperationError::Failed(format!("unsupported operation: {method}")))?;
        self.agent.execute(op, params).await
    }
}

/// 把 params 反序列化为操作的参数类型；null 视为空对象
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, OperationError> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| OperationError::InvalidParams(e.to_string()))
}

/// 列出操作及其参数 schema，供 describe 操作使用
pub fn describe_operations<O: Operation>() -> Value {
    Value::Array(
        O::ALL
            .iter()
            .map(|op| {
                serde_json::json!({
                    "name": op.name(),
                    "params": op.params_schema(),
                })
            })
            .collect(),
    )
}
