//! Echo Agent（测试与连通性检查用）

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{describe_operations, parse_params, Operation, OperationError, TypedAgent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOp {
    Echo,
    Ping,
    Describe,
}

/// echo 的参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoParams {
    /// 要回显的文本
    #[serde(default)]
    pub text: Option<String>,
}

impl Operation for EchoOp {
    const ALL: &'static [Self] = &[EchoOp::Echo, EchoOp::Ping, EchoOp::Describe];

    fn name(self) -> &'static str {
        match self {
            EchoOp::Echo => "echo",
            EchoOp::Ping => "ping",
            EchoOp::Describe => "describe",
        }
    }

    fn params_schema(self) -> Value {
        match self {
            EchoOp::Echo => serde_json::to_value(schema_for!(EchoParams)).unwrap_or_default(),
            EchoOp::Ping | EchoOp::Describe => json!({ "type": "object" }),
        }
    }
}

/// Echo Agent：回显文本
pub struct EchoAgent;

#[async_trait]
impl TypedAgent for EchoAgent {
    type Op = EchoOp;

    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn execute(&self, op: EchoOp, params: Value) -> Result<Value, OperationError> {
        match op {
            EchoOp::Echo => {
                let params: EchoParams = parse_params(params)?;
                Ok(json!({ "text": params.text.unwrap_or_else(|| "(empty)".to_string()) }))
            }
            EchoOp::Ping => Ok(json!("pong")),
            EchoOp::Describe => Ok(json!({
                "name": self.name(),
                "version": self.version(),
                "operations": describe_operations::<EchoOp>(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_text() {
        let out = EchoAgent
            .execute(EchoOp::Echo, json!({ "text": "hi" }))
            .await
            .unwrap();
        assert_eq!(out["text"], "hi");
    }

    #[tokio::test]
    async fn test_echo_defaults_to_empty_marker() {
        let out = EchoAgent.execute(EchoOp::Echo, Value::Null).await.unwrap();
        assert_eq!(out["text"], "(empty)");
    }

    #[tokio::test]
    async fn test_describe_lists_schemas() {
        let out = EchoAgent.execute(EchoOp::Describe, Value::Null).await.unwrap();
        let ops = out["operations"].as_array().unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0]["name"], "echo");
        assert!(ops[0]["params"]["properties"]["text"].is_object());
    }
}
