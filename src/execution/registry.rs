//! 执行注册表
//!
//! 所有变更（register / complete / evict / 过期）都经过同一把锁串行化。
//! 每条活跃记录持有一个可取消的过期定时器（tokio 任务 + CancellationToken），按 execution id 索引；
//! complete 与定时器触发竞争时，先拿到锁的一方生效，另一方看到记录已不在活跃集合中便什么也不做。
//! 定时器侧用 biased select 优先观察取消，所以重叠时 completion 优先。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::history::{CompletionRecord, HistorySink};
use super::record::{ExecutionRecord, ExecutionStatus};
use crate::core::error::RegistryError;

/// 默认 TTL：10 分钟
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// 单条记录的过期定时器；cancel 可重复调用
struct ExpiryTimer {
    seq: u64,
    token: CancellationToken,
}

impl ExpiryTimer {
    fn cancel(&self) {
        self.token.cancel();
    }
}

struct ActiveEntry {
    record: ExecutionRecord,
    timer: ExpiryTimer,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<String, ActiveEntry>,
    closed: bool,
}

impl RegistryState {
    /// 按登记顺序的快照
    fn snapshot(&self) -> Vec<ExecutionRecord> {
        let mut entries: Vec<&ActiveEntry> = self.active.values().collect();
        entries.sort_by_key(|e| e.timer.seq);
        entries.into_iter().map(|e| e.record.clone()).collect()
    }

    fn take(&mut self, execution_id: &str) -> Option<ExecutionRecord> {
        let entry = self.active.remove(execution_id)?;
        entry.timer.cancel();
        Some(entry.record)
    }
}

struct Inner {
    state: Mutex<RegistryState>,
    sink: Arc<dyn HistorySink>,
    default_ttl: Duration,
    next_seq: AtomicU64,
    /// 所有定时器 token 的父 token；shutdown 时一次性取消
    root: CancellationToken,
}

impl Drop for Inner {
    /// 没走 shutdown 就被丢弃时，也让所有定时器任务立即退出
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// 执行注册表句柄；clone 共享同一份状态
#[derive(Clone)]
pub struct ExecutionRegistry {
    inner: Arc<Inner>,
}

impl ExecutionRegistry {
    pub fn new(sink: Arc<dyn HistorySink>, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RegistryState::default()),
                sink,
                default_ttl,
                next_seq: AtomicU64::new(0),
                root: CancellationToken::new(),
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    pub fn sink(&self) -> Arc<dyn HistorySink> {
        Arc::clone(&self.inner.sink)
    }

    /// 以默认 TTL 登记
    pub async fn register(&self, record: ExecutionRecord) -> Result<(), RegistryError> {
        self.register_with_ttl(record, self.inner.default_ttl).await
    }

    /// 登记执行并启动过期定时器；状态重置为 pending
    pub async fn register_with_ttl(
        &self,
        record: ExecutionRecord,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        self.insert(record, ttl, false).await.map(|_| ())
    }

    /// 登记并直接置为 executing，两步在同一次加锁内完成，
    /// 中间不会被过期定时器或完成信号插入。返回登记后的快照。
    pub async fn register_executing(
        &self,
        record: ExecutionRecord,
        ttl: Duration,
    ) -> Result<ExecutionRecord, RegistryError> {
        self.insert(record, ttl, true).await
    }

    async fn insert(
        &self,
        mut record: ExecutionRecord,
        ttl: Duration,
        executing: bool,
    ) -> Result<ExecutionRecord, RegistryError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(RegistryError::ShutDown);
        }
        if state.active.contains_key(&record.execution_id) {
            return Err(RegistryError::DuplicateExecutionId(record.execution_id));
        }

        record.status = ExecutionStatus::Pending;
        if executing {
            record.transition(ExecutionStatus::Executing)?;
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.root.child_token();
        spawn_expiry(
            Arc::downgrade(&self.inner),
            record.execution_id.clone(),
            seq,
            ttl,
            token.clone(),
        );

        tracing::debug!(
            execution_id = %record.execution_id,
            agent = %record.agent_name,
            ttl_ms = ttl.as_millis() as u64,
            "execution registered"
        );
        let snapshot = record.clone();
        state.active.insert(
            record.execution_id.clone(),
            ActiveEntry {
                record,
                timer: ExpiryTimer { seq, token },
            },
        );
        Ok(snapshot)
    }

    /// pending → executing；记录不存在时返回 Ok(None)
    pub async fn mark_executing(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, RegistryError> {
        let mut state = self.inner.state.lock().await;
        match state.active.get_mut(execution_id) {
            Some(entry) => {
                entry.record.transition(ExecutionStatus::Executing)?;
                Ok(Some(entry.record.clone()))
            }
            None => Ok(None),
        }
    }

    /// 取消定时器并移出活跃集合，记录交给调用方收尾（设置终态、写历史）。
    /// 已完成或已过期的 id 返回 None，属于正常的幂等情况。
    pub async fn complete(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let taken = self.inner.state.lock().await.take(execution_id);
        match &taken {
            Some(_) => tracing::debug!(execution_id, "execution completed"),
            None => tracing::debug!(execution_id, "complete: execution not active"),
        }
        taken
    }

    /// 在锁内对活跃快照执行 select，命中则原子地移出。
    /// 关联引擎用它保证「挑选」和「移出」之间不会被过期或其它完成插入。
    pub async fn take_matching<T, F>(&self, select: F) -> Option<(ExecutionRecord, T)>
    where
        F: FnOnce(&[ExecutionRecord]) -> Option<(String, T)>,
    {
        let mut state = self.inner.state.lock().await;
        let snapshot = state.snapshot();
        let (execution_id, extra) = select(&snapshot)?;
        state.take(&execution_id).map(|record| (record, extra))
    }

    /// 单条记录快照
    pub async fn get(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.inner
            .state
            .lock()
            .await
            .active
            .get(execution_id)
            .map(|e| e.record.clone())
    }

    /// 活跃记录快照（登记顺序，调用方不应依赖）
    pub async fn list_active(&self) -> Vec<ExecutionRecord> {
        self.inner.state.lock().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.active.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 主动驱逐：状态置为 failed，附原因写入历史
    pub async fn evict(&self, execution_id: &str, reason: &str) -> Option<ExecutionRecord> {
        let record = self.inner.state.lock().await.take(execution_id)?;
        Some(self.finish_evicted(record, reason))
    }

    /// 驱逐某个 Agent 名下的所有活跃执行
    pub async fn evict_agent(&self, agent_name: &str, reason: &str) -> Vec<ExecutionRecord> {
        let taken: Vec<ExecutionRecord> = {
            let mut state = self.inner.state.lock().await;
            let ids: Vec<String> = state
                .snapshot()
                .into_iter()
                .filter(|r| r.agent_name == agent_name)
                .map(|r| r.execution_id)
                .collect();
            ids.iter().filter_map(|id| state.take(id)).collect()
        };
        if !taken.is_empty() {
            tracing::info!(agent = agent_name, count = taken.len(), reason, "evicted executions");
        }
        taken
            .into_iter()
            .map(|record| self.finish_evicted(record, reason))
            .collect()
    }

    /// 关闭注册表：取消所有定时器，剩余记录以 reason 驱逐；之后 register 返回 ShutDown
    pub async fn shutdown(&self, reason: &str) -> usize {
        let drained: Vec<ExecutionRecord> = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return 0;
            }
            state.closed = true;
            self.inner.root.cancel();
            let mut entries: Vec<ActiveEntry> = state.active.drain().map(|(_, e)| e).collect();
            entries.sort_by_key(|e| e.timer.seq);
            entries.into_iter().map(|e| e.record).collect()
        };
        let count = drained.len();
        for record in drained {
            self.finish_evicted(record, reason);
        }
        tracing::info!(evicted = count, "execution registry shut down");
        count
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }

    /// 定时器触发；seq 不匹配（同 id 已重新登记）或已被取消时不做任何事
    async fn expire(&self, execution_id: &str, seq: u64) -> Option<ExecutionRecord> {
        let mut record = {
            let mut state = self.inner.state.lock().await;
            let live = state
                .active
                .get(execution_id)
                .map(|e| e.timer.seq == seq && !e.timer.token.is_cancelled())
                .unwrap_or(false);
            if !live {
                return None;
            }
            state.active.remove(execution_id)?.record
        };
        if let Err(e) = record.transition(ExecutionStatus::TimedOut) {
            tracing::warn!("{}", e);
        }
        tracing::info!(execution_id, agent = %record.agent_name, "execution timed out");
        self.inner.sink.append(CompletionRecord::timed_out(record.clone()));
        Some(record)
    }

    fn finish_evicted(&self, mut record: ExecutionRecord, reason: &str) -> ExecutionRecord {
        if let Err(e) = record.transition(ExecutionStatus::Failed) {
            tracing::warn!("{}", e);
        }
        self.inner
            .sink
            .append(CompletionRecord::evicted(record.clone(), reason));
        record
    }
}

fn spawn_expiry(
    registry: Weak<Inner>,
    execution_id: String,
    seq: u64,
    ttl: Duration,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(ttl) => {
                // 让同一时刻就绪的 complete 先拿锁
                tokio::task::yield_now().await;
                if let Some(inner) = registry.upgrade() {
                    ExecutionRegistry { inner }.expire(&execution_id, seq).await;
                }
            }
        }
    });
}
