//! 编码助手 Agent
//!
//! executeTask 把任务交给外部 AI 编码助手带外执行：登记 ExecutionRecord、置为 executing，
//! 返回 executionId 以及要求外部环境在完成信号中回传该 id 的指令。
//! 外部环境是否照做不可控，回传的信号交由关联引擎处理。

use std::time::Duration;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{describe_operations, parse_params, Operation, OperationError, TypedAgent};
use crate::core::error::RegistryError;
use crate::execution::{ExecutionRecord, ExecutionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantOp {
    ExecuteTask,
    GetStatus,
    ListExecutions,
    Describe,
}

/// executeTask 的参数
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTaskParams {
    /// 交给外部助手的任务描述
    pub task_description: String,
    /// 附加上下文（文件、约束等）
    #[serde(default)]
    pub context: Option<String>,
    /// 覆盖默认 TTL（秒）
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// getStatus 的参数
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetStatusParams {
    pub execution_id: String,
}

impl Operation for AssistantOp {
    const ALL: &'static [Self] = &[
        AssistantOp::ExecuteTask,
        AssistantOp::GetStatus,
        AssistantOp::ListExecutions,
        AssistantOp::Describe,
    ];

    fn name(self) -> &'static str {
        match self {
            AssistantOp::ExecuteTask => "executeTask",
            AssistantOp::GetStatus => "getStatus",
            AssistantOp::ListExecutions => "listExecutions",
            AssistantOp::Describe => "describe",
        }
    }

    fn params_schema(self) -> Value {
        let schema = match self {
            AssistantOp::ExecuteTask => serde_json::to_value(schema_for!(ExecuteTaskParams)),
            AssistantOp::GetStatus => serde_json::to_value(schema_for!(GetStatusParams)),
            AssistantOp::ListExecutions | AssistantOp::Describe => {
                return json!({ "type": "object" })
            }
        };
        schema.unwrap_or_default()
    }
}

/// 编码助手 Agent：持有执行注册表句柄
pub struct AssistantAgent {
    name: String,
    registry: ExecutionRegistry,
}

impl AssistantAgent {
    pub const DEFAULT_NAME: &'static str = "assistant";

    pub fn new(registry: ExecutionRegistry) -> Self {
        Self::with_name(Self::DEFAULT_NAME, registry)
    }

    pub fn with_name(name: impl Into<String>, registry: ExecutionRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }

    async fn execute_task(&self, params: Value) -> Result<Value, OperationError> {
        let original = params.clone();
        let params: ExecuteTaskParams = parse_params(params)?;
        if params.task_description.trim().is_empty() {
            return Err(OperationError::InvalidParams(
                "taskDescription must not be empty".to_string(),
            ));
        }

        let execution_id = format!("exec_{}", uuid::Uuid::new_v4());
        let record = ExecutionRecord::new(
            &execution_id,
            &self.name,
            AssistantOp::ExecuteTask.name(),
            &params.task_description,
        )
        .with_params(original);
        // 与配置一致，TTL 至少 1 秒
        let ttl = params
            .ttl_secs
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or_else(|| self.registry.default_ttl());

        let record = self
            .registry
            .register_executing(record, ttl)
            .await
            .map_err(registry_failure)?;

        tracing::info!(execution_id = %execution_id, agent = %self.name, "task handed off");

        let instruction = handoff_instruction(
            &execution_id,
            &params.task_description,
            params.context.as_deref(),
        );
        Ok(json!({
            "executionId": record.execution_id,
            "status": record.status,
            "startTime": record.start_time,
            "ttlSecs": ttl.as_secs(),
            "instruction": instruction,
        }))
    }

    async fn get_status(&self, params: Value) -> Result<Value, OperationError> {
        let params: GetStatusParams = parse_params(params)?;
        Ok(match self.registry.get(&params.execution_id).await {
            Some(record) => json!({
                "executionId": record.execution_id,
                "active": true,
                "status": record.status,
                "startTime": record.start_time,
                "taskDescription": record.task_description,
            }),
            None => json!({
                "executionId": params.execution_id,
                "active": false,
            }),
        })
    }

    async fn list_executions(&self) -> Result<Value, OperationError> {
        let records: Vec<ExecutionRecord> = self
            .registry
            .list_active()
            .await
            .into_iter()
            .filter(|r| r.agent_name == self.name)
            .collect();
        serde_json::to_value(records).map_err(|e| OperationError::Failed(e.to_string()))
    }
}

fn registry_failure(err: RegistryError) -> OperationError {
    OperationError::Failed(err.to_string())
}

/// 交给外部环境的指令，要求完成时回传 executionId
fn handoff_instruction(execution_id: &str, task: &str, context: Option<&str>) -> String {
    let mut text = format!("Task: {task}\n");
    if let Some(context) = context {
        text.push_str(&format!("Context: {context}\n"));
    }
    text.push_str(&format!(
        "When finished, report completion with executionId \"{execution_id}\", \
         the task description, a status (success | partial | error) and a short summary."
    ));
    text
}

#[async_trait]
impl TypedAgent for AssistantAgent {
    type Op = AssistantOp;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn metadata(&self) -> Value {
        json!({ "outOfBand": true })
    }

    async fn execute(&self, op: AssistantOp, params: Value) -> Result<Value, OperationError> {
        match op {
            AssistantOp::ExecuteTask => self.execute_task(params).await,
            AssistantOp::GetStatus => self.get_status(params).await,
            AssistantOp::ListExecutions => self.list_executions().await,
            AssistantOp::Describe => Ok(json!({
                "name": self.name,
                "version": self.version(),
                "operations": describe_operations::<AssistantOp>(),
            })),
        }
    }
}
