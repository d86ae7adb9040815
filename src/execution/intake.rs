//! 完成信号入口
//!
//! 外部环境发来的信号不可信：格式错误只作为 IntakeError 报告，关联失败只是 Orphan 回执，
//! 这条路径上不会有 panic 或向上传播的异常。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::correlation::{CorrelationEngine, CorrelationOutcome, MatchTier};
use super::history::Resolution;
use super::record::{CompletionSignal, ExecutionStatus};

/// 信号解析失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntakeError {
    #[error("Malformed completion signal: {0}")]
    Malformed(String),

    #[error("Completion signal is missing taskDescription")]
    MissingTaskDescription,
}

/// 返回给信号发送方的回执；Display 即人类可读摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub execution_id: Option<String>,
    pub status: ExecutionStatus,
    pub resolution: Resolution,
    pub score: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub summary: Option<String>,
}

impl Acknowledgement {
    pub fn is_orphan(&self) -> bool {
        self.resolution == Resolution::Orphan
    }
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
        match &self.execution_id {
            Some(id) => write!(
                f,
                "Execution {} marked {} ({}) at {}",
                id,
                self.status,
                self.resolution.label(),
                ts
            )?,
            None => write!(
                f,
                "No active execution could be correlated; recorded as orphan ({}) at {}",
                self.status, ts
            )?,
        }
        if let Some(summary) = &self.summary {
            write!(f, "\nSummary: {}", summary)?;
        }
        Ok(())
    }
}

/// 完成信号入口：解析 → 关联 → 回执
#[derive(Clone)]
pub struct CompletionIntake {
    engine: Arc<CorrelationEngine>,
}

impl CompletionIntake {
    pub fn new(engine: Arc<CorrelationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    /// 解析原始 JSON 后提交
    pub async fn submit_json(&self, raw: &str) -> Result<Acknowledgement, IntakeError> {
        let signal: CompletionSignal =
            serde_json::from_str(raw).map_err(|e| IntakeError::Malformed(e.to_string()))?;
        self.submit(signal).await
    }

    pub async fn submit_value(
        &self,
        value: serde_json::Value,
    ) -> Result<Acknowledgement, IntakeError> {
        let signal: CompletionSignal =
            serde_json::from_value(value).map_err(|e| IntakeError::Malformed(e.to_string()))?;
        self.submit(signal).await
    }

    /// 描述为空时只接受带 executionId 的信号，且只做精确匹配；
    /// 两者都没有的信号无法关联也无从审计，直接拒绝
    pub async fn submit(&self, signal: CompletionSignal) -> Result<Acknowledgement, IntakeError> {
        if signal.task_description.trim().is_empty() && signal.usable_execution_id().is_none() {
            tracing::warn!(
                summary = ?signal.summary,
                "rejected completion signal without taskDescription or executionId"
            );
            return Err(IntakeError::MissingTaskDescription);
        }
        let summary = signal.summary.clone();
        let orphan_status = signal.status.terminal_status();

        let ack = match self.engine.resolve(signal).await {
            CorrelationOutcome::Matched { record, tier } => {
                let (resolution, score) = match tier {
                    MatchTier::ExactId => (Resolution::ExactId, None),
                    MatchTier::Unique => (Resolution::Unique, None),
                    MatchTier::Similarity { score } => (Resolution::Similarity, Some(score)),
                };
                Acknowledgement {
                    execution_id: Some(record.execution_id),
                    status: record.status,
                    resolution,
                    score,
                    timestamp: Utc::now(),
                    summary,
                }
            }
            CorrelationOutcome::Unmatched { .. } => Acknowledgement {
                execution_id: None,
                status: orphan_status,
                resolution: Resolution::Orphan,
                score: None,
                timestamp: Utc::now(),
                summary,
            },
        };
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{
        CorrelationConfig, ExecutionRecord, ExecutionRegistry, InMemoryHistory, DEFAULT_TTL,
    };

    fn intake() -> (CompletionIntake, ExecutionRegistry, Arc<InMemoryHistory>) {
        let history = Arc::new(InMemoryHistory::new(10));
        let registry = ExecutionRegistry::new(history.clone(), DEFAULT_TTL);
        let engine = Arc::new(CorrelationEngine::new(
            registry.clone(),
            CorrelationConfig::default(),
        ));
        (CompletionIntake::new(engine), registry, history)
    }

    #[tokio::test]
    async fn test_malformed_json_is_reported() {
        let (intake, _, history) = intake();
        let err = intake.submit_json("{not json").await.unwrap_err();
        assert!(matches!(err, IntakeError::Malformed(_)));
        let err = intake.submit_json(r#"{"status":"success"}"#).await.unwrap_err();
        assert!(matches!(err, IntakeError::Malformed(_)));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_blank_description_rejected() {
        let (intake, _, _) = intake();
        let err = intake.submit(CompletionSignal::new("   ")).await.unwrap_err();
        assert_eq!(err, IntakeError::MissingTaskDescription);
    }

    #[tokio::test]
    async fn test_blank_description_with_exact_id_is_accepted() {
        let (intake, registry, history) = intake();
        registry
            .register(ExecutionRecord::new("e1", "assistant", "executeTask", "x"))
            .await
            .unwrap();
        registry
            .register(ExecutionRecord::new("e2", "assistant", "executeTask", "y"))
            .await
            .unwrap();

        let ack = intake
            .submit(CompletionSignal::new("").with_execution_id("e1"))
            .await
            .unwrap();
        assert_eq!(ack.execution_id.as_deref(), Some("e1"));
        assert_eq!(ack.resolution, Resolution::ExactId);

        // id 未命中时不会退回到唯一匹配，而是记为孤儿
        let ack = intake
            .submit(CompletionSignal::new(" ").with_execution_id("ghost"))
            .await
            .unwrap();
        assert!(ack.is_orphan());
        assert!(registry.get("e2").await.is_some());
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_ack_digest_mentions_execution() {
        let (intake, registry, _) = intake();
        registry
            .register(ExecutionRecord::new("e1", "assistant", "executeTask", "x"))
            .await
            .unwrap();
        let ack = intake
            .submit_json(r#"{"executionId":"e1","taskDescription":"x","summary":"all good"}"#)
            .await
            .unwrap();
        assert_eq!(ack.resolution, Resolution::ExactId);
        let digest = ack.to_string();
        assert!(digest.contains("e1"));
        assert!(digest.contains("completed"));
        assert!(digest.contains("all good"));
    }

    #[tokio::test]
    async fn test_orphan_ack() {
        let (intake, _, history) = intake();
        let ack = intake
            .submit(CompletionSignal::new("nothing running"))
            .await
            .unwrap();
        assert!(ack.is_orphan());
        assert!(ack.to_string().contains("orphan"));
        assert_eq!(history.len(), 1);
    }
}
