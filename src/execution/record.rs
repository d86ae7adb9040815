//! 执行记录与完成信号
//!
//! ExecutionRecord 的状态只能单调前进：pending → executing → 终态（completed / completedWithWarning / failed / timedOut），
//! 终态不可回退。CompletionSignal 来自外部不可信环境，executionId 可能缺失或错误。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::RegistryError;

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    /// 已登记，尚未交给外部环境
    Pending,
    /// 已交给外部环境执行
    Executing,
    Completed,
    /// 外部环境报告 partial
    CompletedWithWarning,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::CompletedWithWarning
                | ExecutionStatus::Failed
                | ExecutionStatus::TimedOut
        )
    }

    /// 是否允许从 self 迁移到 next
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        match self {
            ExecutionStatus::Pending => next != ExecutionStatus::Pending,
            ExecutionStatus::Executing => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::CompletedWithWarning => "completedWithWarning",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timedOut",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次带外执行的登记记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub agent_name: String,
    pub method: String,
    /// 任务描述（内容相似度匹配使用）
    pub task_description: String,
    pub start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub original_params: Value,
}

impl ExecutionRecord {
    pub fn new(
        execution_id: impl Into<String>,
        agent_name: impl Into<String>,
        method: impl Into<String>,
        task_description: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            agent_name: agent_name.into(),
            method: method.into(),
            task_description: task_description.into(),
            start_time: Utc::now(),
            status: ExecutionStatus::Pending,
            original_params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.original_params = params;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// 按单调规则迁移状态
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), RegistryError> {
        if !self.status.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                id: self.execution_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// 外部环境报告的完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    #[default]
    Success,
    Partial,
    Error,
}

impl SignalStatus {
    /// 信号状态对应的执行终态
    pub fn terminal_status(self) -> ExecutionStatus {
        match self {
            SignalStatus::Success => ExecutionStatus::Completed,
            SignalStatus::Partial => ExecutionStatus::CompletedWithWarning,
            SignalStatus::Error => ExecutionStatus::Failed,
        }
    }
}

/// 完成信号附带的元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMetadata {
    /// 耗时（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
}

/// 外部环境发回的完成信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub task_description: String,
    #[serde(default)]
    pub status: SignalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SignalMetadata>,
}

impl CompletionSignal {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            execution_id: None,
            task_description: task_description.into(),
            status: SignalStatus::Success,
            summary: None,
            metadata: None,
        }
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: SignalStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_metadata(mut self, metadata: SignalMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// 去掉空白后的 executionId；空字符串视为未提供
    pub fn usable_execution_id(&self) -> Option<&str> {
        self.execution_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        let mut record = ExecutionRecord::new("e1", "assistant", "executeTask", "x");
        record.transition(ExecutionStatus::Executing).unwrap();
        assert!(record.transition(ExecutionStatus::Pending).is_err());
        record.transition(ExecutionStatus::Completed).unwrap();
        assert!(record.transition(ExecutionStatus::Executing).is_err());
        assert!(record.transition(ExecutionStatus::TimedOut).is_err());
        assert_eq!(record.status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_pending_can_go_straight_to_terminal() {
        let mut record = ExecutionRecord::new("e1", "assistant", "executeTask", "x");
        record.transition(ExecutionStatus::TimedOut).unwrap();
        assert!(record.status.is_terminal());
    }

    #[test]
    fn test_signal_parses_with_defaults() {
        let signal: CompletionSignal =
            serde_json::from_str(r#"{"taskDescription":"Add input validation"}"#).unwrap();
        assert_eq!(signal.status, SignalStatus::Success);
        assert!(signal.usable_execution_id().is_none());
    }

    #[test]
    fn test_signal_metadata_camel_case() {
        let raw = r#"{
            "executionId": " e9 ",
            "taskDescription": "done",
            "status": "partial",
            "metadata": {"duration": 12.5, "toolsUsed": ["grep"], "filesModified": ["a.rs"]}
        }"#;
        let signal: CompletionSignal = serde_json::from_str(raw).unwrap();
        assert_eq!(signal.usable_execution_id(), Some("e9"));
        assert_eq!(signal.status.terminal_status(), ExecutionStatus::CompletedWithWarning);
        let meta = signal.metadata.unwrap();
        assert_eq!(meta.tools_used, vec!["grep".to_string()]);
        assert_eq!(meta.files_modified, vec!["a.rs".to_string()]);
    }

    #[test]
    fn test_blank_execution_id_is_ignored() {
        let signal = CompletionSignal::new("x").with_execution_id("   ");
        assert!(signal.usable_execution_id().is_none());
    }
}
