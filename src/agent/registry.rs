//! Agent 注册表
//!
//! 按名称保存 AgentHandle；每个 handle 带一个 active 标志（inactive ⇄ active），
//! 分发器据此拒绝对停用 Agent 的调用。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::traits::{Agent, AgentDescriptor, TypedAgent, TypedAgentAdapter};

/// 已注册的 Agent 及其激活状态
pub struct AgentHandle {
    agent: Arc<dyn Agent>,
    active: AtomicBool,
}

impl AgentHandle {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            active: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.agent.descriptor().name
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        self.agent.descriptor()
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 激活；返回状态是否发生变化
    pub fn activate(&self) -> bool {
        !self.active.swap(true, Ordering::SeqCst)
    }

    /// 停用；返回状态是否发生变化
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }
}

/// Agent 名称重复
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Agent already registered: {0}")]
pub struct DuplicateAgent(pub String);

/// Agent 注册表：register / get / descriptors / names
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentHandle>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册类型化 Agent（初始为 inactive）
    pub fn register(
        &mut self,
        agent: impl TypedAgent + 'static,
    ) -> Result<Arc<AgentHandle>, DuplicateAgent> {
        self.register_dyn(Arc::new(TypedAgentAdapter::new(agent)))
    }

    pub fn register_dyn(
        &mut self,
        agent: Arc<dyn Agent>,
    ) -> Result<Arc<AgentHandle>, DuplicateAgent> {
        let name = agent.descriptor().name.clone();
        if self.agents.contains_key(&name) {
            return Err(DuplicateAgent(name));
        }
        let handle = Arc::new(AgentHandle::new(agent));
        self.agents.insert(name, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentHandle>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// 所有 Agent 的描述（按名称排序）
    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        let mut descriptors: Vec<AgentDescriptor> =
            self.agents.values().map(|h| h.descriptor().clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EchoAgent;

    #[test]
    fn test_register_starts_inactive_and_toggles() {
        let mut registry = AgentRegistry::new();
        let handle = registry.register(EchoAgent).unwrap();
        assert!(!handle.is_active());
        assert!(handle.activate());
        assert!(!handle.activate());
        assert!(handle.deactivate());
        assert!(!handle.deactivate());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent).unwrap();
        assert_eq!(
            registry.register(EchoAgent).err(),
            Some(DuplicateAgent("echo".to_string()))
        );
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }
}
