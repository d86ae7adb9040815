//! 协议分发器
//!
//! dispatch(agent, request) 总是返回 Response：Agent 不存在 / 未激活 / 方法不支持都转为 error，
//! 操作返回 Err 或 panic 时包装成 InternalError，原始信息放进 data。
//! 每次分发输出一条结构化审计日志。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;

use super::message::{Request, Response};
use crate::agent::{AgentDescriptor, AgentRegistry, OperationError};
use crate::core::error::ProtocolError;
use crate::execution::ExecutionRegistry;

/// Agent 停用时驱逐执行使用的原因
pub const AGENT_DEACTIVATED: &str = "agent-deactivated";

/// 分发器：持有 Agent 注册表与执行注册表
#[derive(Clone)]
pub struct Dispatcher {
    agents: Arc<AgentRegistry>,
    executions: ExecutionRegistry,
}

impl Dispatcher {
    pub fn new(agents: Arc<AgentRegistry>, executions: ExecutionRegistry) -> Self {
        Self { agents, executions }
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn executions(&self) -> &ExecutionRegistry {
        &self.executions
    }

    /// 把请求分发给指定 Agent；任何失败都在 Response.error 中返回
    pub async fn dispatch(&self, agent: &str, request: Request) -> Response {
        let start = Instant::now();
        let method = request.method.clone();
        let response = match self.try_dispatch(agent, request.method, request.params).await {
            Ok(result) => Response::success(request.id, result),
            Err(err) => Response::failure(request.id, &err),
        };

        let audit = serde_json::json!({
            "event": "dispatch_audit",
            "agent": agent,
            "method": method,
            "ok": response.is_success(),
            "code": response.error().map(|e| e.code),
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "dispatch");
        response
    }

    async fn try_dispatch(
        &self,
        agent: &str,
        method: String,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProtocolError> {
        let handle = self
            .agents
            .get(agent)
            .ok_or_else(|| ProtocolError::AgentNotFound(agent.to_string()))?;
        if !handle.is_active() {
            return Err(ProtocolError::AgentInactive(agent.to_string()));
        }
        if !handle.agent().supports(&method) {
            return Err(ProtocolError::MethodNotFound {
                agent: agent.to_string(),
                method,
            });
        }

        let invocation = handle.agent().invoke(&method, params);
        let outcome = AssertUnwindSafe(invocation).catch_unwind().await;

        // 调用期间 Agent 被停用：补驱逐调用中途登记的执行
        if !handle.is_active() {
            let evicted = self
                .executions
                .evict_agent(handle.name(), AGENT_DEACTIVATED)
                .await;
            if !evicted.is_empty() {
                tracing::info!(
                    agent,
                    evicted = evicted.len(),
                    "evicted executions registered after deactivation"
                );
            }
        }

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(OperationError::InvalidParams(detail))) => {
                Err(ProtocolError::InvalidParams(detail))
            }
            Ok(Err(OperationError::Failed(detail))) => Err(ProtocolError::InternalError(detail)),
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                tracing::error!(agent, method = %method, "operation panicked: {}", detail);
                Err(ProtocolError::InternalError(detail))
            }
        }
    }

    /// 激活 Agent；返回状态是否变化
    pub fn activate(&self, agent: &str) -> Result<bool, ProtocolError> {
        let handle = self
            .agents
            .get(agent)
            .ok_or_else(|| ProtocolError::AgentNotFound(agent.to_string()))?;
        let changed = handle.activate();
        if changed {
            tracing::info!(agent, "agent activated");
        }
        Ok(changed)
    }

    /// 停用 Agent，并以 failed / agent-deactivated 驱逐其名下的活跃执行；返回被驱逐的数量。
    /// 已经停用时也会再扫一遍。已经分发出去的调用不受影响，
    /// 它们结束后登记的执行由 dispatch 收尾时驱逐。
    pub async fn deactivate(&self, agent: &str) -> Result<usize, ProtocolError> {
        let handle = self
            .agents
            .get(agent)
            .ok_or_else(|| ProtocolError::AgentNotFound(agent.to_string()))?;
        let changed = handle.deactivate();
        let evicted = self
            .executions
            .evict_agent(handle.name(), AGENT_DEACTIVATED)
            .await;
        if changed {
            tracing::info!(agent, evicted = evicted.len(), "agent deactivated");
        }
        Ok(evicted.len())
    }

    /// 所有 Agent 的描述与激活状态
    pub fn describe_agents(&self) -> Vec<(AgentDescriptor, bool)> {
        self.agents
            .descriptors()
            .into_iter()
            .map(|d| {
                let active = self
                    .agents
                    .get(&d.name)
                    .map(|h| h.is_active())
                    .unwrap_or(false);
                (d, active)
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{EchoAgent, Operation, TypedAgent};
    use crate::core::error::codes;
    use crate::execution::{ExecutionRecord, ExecutionStatus, InMemoryHistory, DEFAULT_TTL};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    #[derive(Clone, Copy)]
    enum FaultyOp {
        Fail,
        Panic,
    }

    impl Operation for FaultyOp {
        const ALL: &'static [Self] = &[FaultyOp::Fail, FaultyOp::Panic];

        fn name(self) -> &'static str {
            match self {
                FaultyOp::Fail => "fail",
                FaultyOp::Panic => "panic",
            }
        }
    }

    struct FaultyAgent;

    #[async_trait]
    impl TypedAgent for FaultyAgent {
        type Op = FaultyOp;

        fn name(&self) -> &str {
            "faulty"
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        async fn execute(&self, op: FaultyOp, _params: Value) -> Result<Value, OperationError> {
            match op {
                FaultyOp::Fail => Err(OperationError::Failed("disk full".to_string())),
                FaultyOp::Panic => panic!("kaboom"),
            }
        }
    }

    #[derive(Clone, Copy)]
    enum SlowOp {
        Start,
    }

    impl Operation for SlowOp {
        const ALL: &'static [Self] = &[SlowOp::Start];

        fn name(self) -> &'static str {
            "start"
        }
    }

    /// 等 gate 放行后才登记执行，用来模拟停用时仍在途的调用
    struct SlowAgent {
        gate: Arc<Notify>,
        executions: ExecutionRegistry,
    }

    #[async_trait]
    impl TypedAgent for SlowAgent {
        type Op = SlowOp;

        fn name(&self) -> &str {
            "slow"
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        async fn execute(&self, _op: SlowOp, _params: Value) -> Result<Value, OperationError> {
            self.gate.notified().await;
            self.executions
                .register(ExecutionRecord::new("late", "slow", "start", "late task"))
                .await
                .map_err(|e| OperationError::Failed(e.to_string()))?;
            Ok(json!({ "executionId": "late" }))
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<InMemoryHistory>) {
        let history = Arc::new(InMemoryHistory::new(10));
        let executions = ExecutionRegistry::new(history.clone(), DEFAULT_TTL);
        let mut agents = AgentRegistry::new();
        agents.register(EchoAgent).unwrap();
        agents.register(FaultyAgent).unwrap();
        (Dispatcher::new(Arc::new(agents), executions), history)
    }

    #[tokio::test]
    async fn test_inactive_agent_rejected() {
        let (dispatcher, _) = dispatcher();
        let resp = dispatcher
            .dispatch("echo", Request::new("1", "ping", Value::Null))
            .await;
        assert_eq!(resp.id(), "1");
        assert_eq!(resp.error().unwrap().code, codes::AGENT_INACTIVE);
    }

    #[tokio::test]
    async fn test_inactive_checked_before_method() {
        let (dispatcher, _) = dispatcher();
        let resp = dispatcher
            .dispatch("echo", Request::new("1", "nope", Value::Null))
            .await;
        assert_eq!(resp.error().unwrap().code, codes::AGENT_INACTIVE);
    }

    #[tokio::test]
    async fn test_unknown_method_and_agent() {
        let (dispatcher, _) = dispatcher();
        dispatcher.activate("echo").unwrap();
        let resp = dispatcher
            .dispatch("echo", Request::new("2", "shout", Value::Null))
            .await;
        assert_eq!(resp.error().unwrap().code, codes::METHOD_NOT_FOUND);

        let resp = dispatcher
            .dispatch("ghost", Request::new("3", "ping", Value::Null))
            .await;
        assert_eq!(resp.error().unwrap().code, codes::AGENT_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let (dispatcher, _) = dispatcher();
        dispatcher.activate("echo").unwrap();
        let resp = dispatcher
            .dispatch("echo", Request::new("4", "echo", json!({ "text": "hello" })))
            .await;
        assert!(resp.is_success());
        assert_eq!(resp.result().unwrap()["text"], "hello");
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let (dispatcher, _) = dispatcher();
        dispatcher.activate("echo").unwrap();
        let resp = dispatcher
            .dispatch("echo", Request::new("5", "echo", json!({ "text": 42 })))
            .await;
        assert_eq!(resp.error().unwrap().code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_operation_error_and_panic_become_internal_error() {
        let (dispatcher, _) = dispatcher();
        dispatcher.activate("faulty").unwrap();

        let resp = dispatcher
            .dispatch("faulty", Request::new("6", "fail", Value::Null))
            .await;
        let err = resp.error().unwrap();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        assert_eq!(err.data, Some(json!("disk full")));

        let resp = dispatcher
            .dispatch("faulty", Request::new("7", "panic", Value::Null))
            .await;
        let err = resp.error().unwrap();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        assert_eq!(err.data, Some(json!("kaboom")));
    }

    #[tokio::test]
    async fn test_deactivate_evicts_agent_executions() {
        let (dispatcher, history) = dispatcher();
        dispatcher.activate("echo").unwrap();
        dispatcher
            .executions()
            .register(ExecutionRecord::new("e1", "echo", "echo", "x"))
            .await
            .unwrap();

        assert_eq!(dispatcher.deactivate("echo").await.unwrap(), 1);
        assert_eq!(dispatcher.deactivate("echo").await.unwrap(), 0);
        assert!(dispatcher.executions().is_empty().await);
        assert_eq!(history.entries()[0].reason.as_deref(), Some(AGENT_DEACTIVATED));

        let resp = dispatcher
            .dispatch("echo", Request::new("8", "ping", Value::Null))
            .await;
        assert_eq!(resp.error().unwrap().code, codes::AGENT_INACTIVE);
    }

    #[tokio::test]
    async fn test_deactivate_again_evicts_stragglers() {
        let (dispatcher, _) = dispatcher();
        dispatcher.activate("echo").unwrap();
        assert_eq!(dispatcher.deactivate("echo").await.unwrap(), 0);

        // 已停用后才出现的执行，再次 deactivate 仍会被驱逐
        dispatcher
            .executions()
            .register(ExecutionRecord::new("e2", "echo", "echo", "x"))
            .await
            .unwrap();
        assert_eq!(dispatcher.deactivate("echo").await.unwrap(), 1);
        assert!(dispatcher.executions().is_empty().await);
    }

    #[tokio::test]
    async fn test_execution_registered_during_deactivation_is_evicted() {
        let history = Arc::new(InMemoryHistory::new(10));
        let executions = ExecutionRegistry::new(history.clone(), DEFAULT_TTL);
        let gate = Arc::new(Notify::new());
        let mut agents = AgentRegistry::new();
        agents
            .register(SlowAgent {
                gate: gate.clone(),
                executions: executions.clone(),
            })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(agents), executions);
        dispatcher.activate("slow").unwrap();

        let in_flight = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch("slow", Request::new("1", "start", Value::Null))
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert_eq!(dispatcher.deactivate("slow").await.unwrap(), 0);
        gate.notify_one();
        let resp = in_flight.await.unwrap();
        assert!(resp.is_success());

        assert!(dispatcher.executions().is_empty().await);
        let entries = history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].execution_id(), Some("late"));
        assert_eq!(entries[0].status, ExecutionStatus::Failed);
        assert_eq!(entries[0].reason.as_deref(), Some(AGENT_DEACTIVATED));
    }
}
