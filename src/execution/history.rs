//! 完成历史（History Sink）
//!
//! 核心只调用 HistorySink::append；容量上限、持久化、展示都由 sink 自己负责。
//! InMemoryHistory 保留最近 N 条，支持观察者回调（替代全局事件总线）与可选的 NDJSON 日志文件。

use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::correlation::MatchTier;
use super::record::{CompletionSignal, ExecutionRecord, ExecutionStatus, SignalMetadata};

/// 记录是如何到达终态的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// executionId 精确命中
    ExactId,
    /// 只有一个活跃执行
    Unique,
    /// 内容相似度匹配
    Similarity,
    /// 无法关联的信号
    Orphan,
    TimedOut,
    /// 主动驱逐（Agent 停用、服务关闭）
    Evicted,
}

impl Resolution {
    pub fn label(self) -> &'static str {
        match self {
            Resolution::ExactId => "exact id",
            Resolution::Unique => "only active execution",
            Resolution::Similarity => "content similarity",
            Resolution::Orphan => "orphan",
            Resolution::TimedOut => "timed out",
            Resolution::Evicted => "evicted",
        }
    }
}

/// 写入历史的一条完成记录：执行记录 + 终态 + 信号摘要 / 元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    /// 孤儿信号没有执行记录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionRecord>,
    pub status: ExecutionStatus,
    pub resolution: Resolution,
    /// 相似度匹配的得分
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<CompletionSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// 信号成功关联到执行；record.status 已是终态
    pub fn matched(record: ExecutionRecord, signal: CompletionSignal, tier: MatchTier) -> Self {
        let (resolution, score) = match tier {
            MatchTier::ExactId => (Resolution::ExactId, None),
            MatchTier::Unique => (Resolution::Unique, None),
            MatchTier::Similarity { score } => (Resolution::Similarity, Some(score)),
        };
        Self {
            status: record.status,
            execution: Some(record),
            resolution,
            score,
            signal: Some(signal),
            reason: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn orphan(signal: CompletionSignal) -> Self {
        Self {
            execution: None,
            status: signal.status.terminal_status(),
            resolution: Resolution::Orphan,
            score: None,
            signal: Some(signal),
            reason: Some("no active execution could be correlated".to_string()),
            recorded_at: Utc::now(),
        }
    }

    pub fn timed_out(record: ExecutionRecord) -> Self {
        Self {
            status: record.status,
            execution: Some(record),
            resolution: Resolution::TimedOut,
            score: None,
            signal: None,
            reason: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn evicted(record: ExecutionRecord, reason: impl Into<String>) -> Self {
        Self {
            status: record.status,
            execution: Some(record),
            resolution: Resolution::Evicted,
            score: None,
            signal: None,
            reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution.as_ref().map(|r| r.execution_id.as_str())
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.execution.as_ref().map(|r| r.agent_name.as_str())
    }

    pub fn is_orphan(&self) -> bool {
        self.resolution == Resolution::Orphan
    }

    pub fn summary(&self) -> Option<&str> {
        self.signal.as_ref().and_then(|s| s.summary.as_deref())
    }

    pub fn metadata(&self) -> Option<&SignalMetadata> {
        self.signal.as_ref().and_then(|s| s.metadata.as_ref())
    }
}

/// 完成记录的接收方
pub trait HistorySink: Send + Sync {
    fn append(&self, record: CompletionRecord);
}

/// 历史追加时的回调（UI 等订阅方实现）
pub trait HistoryObserver: Send + Sync {
    fn on_append(&self, record: &CompletionRecord);

    /// 返回 true 后会在下一次追加时被移除
    fn is_closed(&self) -> bool {
        false
    }
}

/// 把每条记录转发到 mpsc 通道的观察者
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<CompletionRecord>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<CompletionRecord>) -> Self {
        Self { tx }
    }
}

impl HistoryObserver for ChannelObserver {
    fn on_append(&self, record: &CompletionRecord) {
        if self.tx.send(record.clone()).is_err() {
            tracing::debug!("history subscriber dropped");
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 历史查询条件
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub status: Option<ExecutionStatus>,
    pub agent: Option<String>,
    pub orphans_only: bool,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn orphans_only(mut self) -> Self {
        self.orphans_only = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &CompletionRecord) -> bool {
        if self.orphans_only && !record.is_orphan() {
            return false;
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(agent) = &self.agent {
            if record.agent_name() != Some(agent.as_str()) {
                return false;
            }
        }
        true
    }
}

/// 历史统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: usize,
    pub completed: usize,
    pub completed_with_warning: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub orphans: usize,
    pub per_agent: BTreeMap<String, usize>,
    /// 信号元数据中 duration 的平均值（秒）
    pub average_duration_secs: Option<f64>,
}

/// 内存历史：保留最近 capacity 条
pub struct InMemoryHistory {
    entries: Mutex<VecDeque<CompletionRecord>>,
    capacity: usize,
    observers: RwLock<Vec<Arc<dyn HistoryObserver>>>,
    journal: Option<Mutex<File>>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            observers: RwLock::new(Vec::new()),
            journal: None,
        }
    }

    /// 额外把每条记录以 NDJSON 追加到 path
    pub fn with_journal(mut self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.journal = Some(Mutex::new(file));
        Ok(self)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add_observer(&self, observer: Arc<dyn HistoryObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// 订阅后续追加的记录
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CompletionRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_observer(Arc::new(ChannelObserver::new(tx)));
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// 全部记录，旧的在前
    pub fn entries(&self) -> Vec<CompletionRecord> {
        self.lock_entries().iter().cloned().collect()
    }

    /// 最近 n 条，新的在前
    pub fn recent(&self, n: usize) -> Vec<CompletionRecord> {
        self.lock_entries().iter().rev().take(n).cloned().collect()
    }

    /// 按条件查询，新的在前
    pub fn query(&self, query: &HistoryQuery) -> Vec<CompletionRecord> {
        let entries = self.lock_entries();
        let matched = entries.iter().rev().filter(|r| query.matches(r)).cloned();
        match query.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        }
    }

    pub fn stats(&self) -> HistoryStats {
        let entries = self.lock_entries();
        let mut stats = HistoryStats {
            total: entries.len(),
            ..Default::default()
        };
        let mut durations = Vec::new();
        for record in entries.iter() {
            match record.status {
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::CompletedWithWarning => stats.completed_with_warning += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::TimedOut => stats.timed_out += 1,
                ExecutionStatus::Pending | ExecutionStatus::Executing => {}
            }
            if record.is_orphan() {
                stats.orphans += 1;
            }
            if let Some(agent) = record.agent_name() {
                *stats.per_agent.entry(agent.to_string()).or_default() += 1;
            }
            if let Some(d) = record.metadata().and_then(|m| m.duration) {
                durations.push(d);
            }
        }
        if !durations.is_empty() {
            stats.average_duration_secs = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn flush(&self) -> std::io::Result<()> {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap_or_else(|e| e.into_inner()).flush()?;
        }
        Ok(())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, VecDeque<CompletionRecord>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_journal(&self, record: &CompletionRecord) {
        let Some(journal) = &self.journal else {
            return;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize history record: {}", e);
                return;
            }
        };
        let mut file = journal.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!("Failed to append history journal: {}", e);
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl HistorySink for InMemoryHistory {
    fn append(&self, record: CompletionRecord) {
        self.write_journal(&record);
        {
            let mut entries = self.lock_entries();
            entries.push_back(record.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }
        let mut stale = false;
        {
            let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
            for observer in observers.iter() {
                if observer.is_closed() {
                    stale = true;
                    continue;
                }
                observer.on_append(&record);
            }
        }
        if stale {
            self.observers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|o| !o.is_closed());
        }
    }
}
