//! 执行关联引擎
//!
//! 把一个可能缺少 executionId 的完成信号关联到至多一条活跃执行，按顺序尝试三层：
//! 1. executionId 精确命中（未命中则继续往下，id 可能被外部环境弄丢或写错）
//! 2. 只有一条活跃执行时直接归属于它
//! 3. 任务描述的词重叠度；达到阈值的候选中取最高分，同分取 start_time 最新者
//!
//! 都不命中即为孤儿信号：作为结果返回并写入历史，不会抛错。

use std::collections::HashSet;

use serde::Serialize;

use super::history::CompletionRecord;
use super::record::{CompletionSignal, ExecutionRecord};
use super::registry::ExecutionRegistry;

/// 相似度打分参数
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationConfig {
    /// 入选阈值（含）
    pub similarity_threshold: f64,
    /// 参与比较的最短词长
    pub min_word_len: usize,
    /// 前缀也算重叠（refactor / refactoring）
    pub match_prefixes: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.4,
            min_word_len: 4,
            match_prefixes: true,
        }
    }
}

/// 命中的层级
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "tier", rename_all = "camelCase")]
pub enum MatchTier {
    ExactId,
    Unique,
    Similarity { score: f64 },
}

/// 未能关联的原因
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum UnmatchedReason {
    NoActiveExecutions,
    /// 只带 executionId 且未命中，没有描述可供后两层使用
    UnknownExecutionId,
    /// 所有候选都低于阈值；best_score 为最高分
    BelowThreshold { best_score: f64 },
}

/// 关联结果
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationOutcome {
    Matched {
        record: ExecutionRecord,
        tier: MatchTier,
    },
    Unmatched {
        reason: UnmatchedReason,
    },
}

impl CorrelationOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, CorrelationOutcome::Matched { .. })
    }

    pub fn record(&self) -> Option<&ExecutionRecord> {
        match self {
            CorrelationOutcome::Matched { record, .. } => Some(record),
            CorrelationOutcome::Unmatched { .. } => None,
        }
    }
}

/// 关联引擎：持有注册表句柄与打分参数
pub struct CorrelationEngine {
    registry: ExecutionRegistry,
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(registry: ExecutionRegistry, config: CorrelationConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// 关联并收尾：命中的记录从注册表移出、设置终态、写入历史；未命中则以孤儿写入历史
    pub async fn resolve(&self, signal: CompletionSignal) -> CorrelationOutcome {
        let mut unmatched = UnmatchedReason::NoActiveExecutions;
        let taken = self
            .registry
            .take_matching(|active| match self.select(&signal, active) {
                Ok((index, tier)) => Some((active[index].execution_id.clone(), tier)),
                Err(reason) => {
                    unmatched = reason;
                    None
                }
            })
            .await;

        let sink = self.registry.sink();
        match taken {
            Some((mut record, tier)) => {
                if let Err(e) = record.transition(signal.status.terminal_status()) {
                    tracing::warn!("{}", e);
                }
                tracing::info!(
                    execution_id = %record.execution_id,
                    tier = ?tier,
                    status = %record.status,
                    "completion signal correlated"
                );
                sink.append(CompletionRecord::matched(record.clone(), signal, tier));
                CorrelationOutcome::Matched { record, tier }
            }
            None => {
                tracing::warn!(
                    execution_id = ?signal.execution_id,
                    reason = ?unmatched,
                    "orphan completion signal"
                );
                sink.append(CompletionRecord::orphan(signal));
                CorrelationOutcome::Unmatched { reason: unmatched }
            }
        }
    }

    /// 只读预览：不移出记录、不写历史
    pub async fn preview(&self, signal: &CompletionSignal) -> CorrelationOutcome {
        let active = self.registry.list_active().await;
        match self.select(signal, &active) {
            Ok((index, tier)) => CorrelationOutcome::Matched {
                record: active[index].clone(),
                tier,
            },
            Err(reason) => CorrelationOutcome::Unmatched { reason },
        }
    }

    /// 三层选择，返回命中记录在 active 中的下标
    pub fn select(
        &self,
        signal: &CompletionSignal,
        active: &[ExecutionRecord],
    ) -> Result<(usize, MatchTier), UnmatchedReason> {
        if let Some(id) = signal.usable_execution_id() {
            if let Some(index) = active.iter().position(|r| r.execution_id == id) {
                return Ok((index, MatchTier::ExactId));
            }
            if signal.task_description.trim().is_empty() {
                return Err(UnmatchedReason::UnknownExecutionId);
            }
            tracing::debug!(execution_id = id, "execution id not active, falling back");
        }

        match active.len() {
            0 => return Err(UnmatchedReason::NoActiveExecutions),
            1 => return Ok((0, MatchTier::Unique)),
            _ => {}
        }

        let mut best: Option<(usize, f64)> = None;
        let mut best_score = 0.0_f64;
        for (index, record) in active.iter().enumerate() {
            let score = similarity(&record.task_description, &signal.task_description, &self.config);
            best_score = best_score.max(score);
            if score < self.config.similarity_threshold {
                continue;
            }
            // 同分时 start_time 较新者胜；仍相同则后登记者胜
            let better = match best {
                None => true,
                Some((current, current_score)) => {
                    score > current_score
                        || (score == current_score
                            && record.start_time >= active[current].start_time)
                }
            };
            if better {
                best = Some((index, score));
            }
        }

        best.map(|(index, score)| (index, MatchTier::Similarity { score }))
            .ok_or(UnmatchedReason::BelowThreshold { best_score })
    }
}

/// 参与比较的词：小写、按空白切分、去掉首尾标点、长度不小于 min_len
pub fn significant_words(text: &str, min_len: usize) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() >= min_len)
        .collect()
}

/// 词重叠度：较小词集中有对应词的数量 / 较小词集大小，取值 [0, 1]
pub fn similarity(a: &str, b: &str, config: &CorrelationConfig) -> f64 {
    let words_a = significant_words(a, config.min_word_len);
    let words_b = significant_words(b, config.min_word_len);
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let (smaller, larger) = if words_a.len() <= words_b.len() {
        (&words_a, &words_b)
    } else {
        (&words_b, &words_a)
    };
    let shared = smaller
        .iter()
        .filter(|w| {
            larger.contains(*w)
                || (config.match_prefixes
                    && larger
                        .iter()
                        .any(|o| o.starts_with(w.as_str()) || w.starts_with(o.as_str())))
        })
        .count();
    shared as f64 / smaller.len() as f64
}
