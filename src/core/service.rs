//! 中继服务：按配置组装历史、执行注册表、关联引擎、Agent 与分发器
//!
//! 注册表不是进程级单例：每个 RelayService 拥有自己的一份，start 初始化、shutdown 销毁，
//! 测试可以各自构造互不干扰的实例。

use std::sync::Arc;

use thiserror::Error;

use crate::agent::{AgentRegistry, AssistantAgent, DuplicateAgent, EchoAgent};
use crate::config::AppConfig;
use crate::execution::{
    Acknowledgement, CompletionIntake, CompletionSignal, CorrelationEngine, ExecutionRegistry,
    InMemoryHistory, IntakeError,
};
use crate::protocol::{Dispatcher, Request, Response};

/// 服务关闭时驱逐剩余执行使用的原因
pub const SERVICE_SHUTDOWN: &str = "service-shutdown";

/// 服务启动失败
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to open history journal: {0}")]
    Journal(#[from] std::io::Error),

    #[error(transparent)]
    DuplicateAgent(#[from] DuplicateAgent),
}

pub struct RelayService {
    config: AppConfig,
    history: Arc<InMemoryHistory>,
    executions: ExecutionRegistry,
    engine: Arc<CorrelationEngine>,
    dispatcher: Dispatcher,
    intake: CompletionIntake,
}

impl RelayService {
    /// 以内置 Agent（echo、assistant）启动
    pub fn start(config: AppConfig) -> Result<Self, ServiceError> {
        Self::start_with(config, |_, _| Ok(()))
    }

    /// 启动，并通过 extra 额外注册 Agent；所有已注册 Agent 启动后即为激活状态
    pub fn start_with<F>(config: AppConfig, extra: F) -> Result<Self, ServiceError>
    where
        F: FnOnce(&ExecutionRegistry, &mut AgentRegistry) -> Result<(), DuplicateAgent>,
    {
        let mut history = InMemoryHistory::new(config.history.capacity);
        if let Some(path) = &config.history.journal_path {
            history = history.with_journal(path)?;
        }
        let history = Arc::new(history);

        let executions = ExecutionRegistry::new(history.clone(), config.registry.default_ttl());
        let engine = Arc::new(CorrelationEngine::new(
            executions.clone(),
            config.correlation.to_correlation_config(),
        ));

        let mut agents = AgentRegistry::new();
        agents.register(EchoAgent)?;
        agents.register(AssistantAgent::new(executions.clone()))?;
        extra(&executions, &mut agents)?;
        let agents = Arc::new(agents);
        let names = agents.names();

        let dispatcher = Dispatcher::new(agents, executions.clone());
        for name in &names {
            let _ = dispatcher.activate(name);
        }
        let intake = CompletionIntake::new(engine.clone());

        tracing::info!(
            agents = ?names,
            ttl_secs = config.registry.default_ttl().as_secs(),
            "relay service started"
        );

        Ok(Self {
            config,
            history,
            executions,
            engine,
            dispatcher,
            intake,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<InMemoryHistory> {
        &self.history
    }

    pub fn executions(&self) -> &ExecutionRegistry {
        &self.executions
    }

    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn intake(&self) -> &CompletionIntake {
        &self.intake
    }

    pub async fn dispatch(&self, agent: &str, request: Request) -> Response {
        self.dispatcher.dispatch(agent, request).await
    }

    pub async fn submit_completion(
        &self,
        signal: CompletionSignal,
    ) -> Result<Acknowledgement, IntakeError> {
        self.intake.submit(signal).await
    }

    /// 停止：取消所有定时器、驱逐剩余执行、flush 历史日志
    pub async fn shutdown(&self) -> usize {
        let evicted = self.executions.shutdown(SERVICE_SHUTDOWN).await;
        if let Err(e) = self.history.flush() {
            tracing::warn!("Failed to flush history journal: {}", e);
        }
        evicted
    }
}
