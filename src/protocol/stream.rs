//! NDJSON 命令流
//!
//! 每行一个 JSON 命令，按 "kind" 区分；每条输入都写回一行 JSON 输出。
//! 解析失败也只写回一行 error，不会中断循环。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::message::Request;
use crate::core::RelayService;
use crate::execution::{CompletionSignal, HistoryQuery};

/// 输入命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamCommand {
    /// 分发请求到 Agent
    Request { agent: String, request: Request },
    /// 外部环境的完成信号（原样 JSON，交给 intake 校验）
    Completion { signal: Value },
    Activate { agent: String },
    Deactivate { agent: String },
    /// 查看活跃执行
    Active,
    /// 查看历史
    History {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        orphans_only: bool,
    },
    Stats,
    Agents,
}

/// 处理一行输入，返回要写回的 JSON
pub async fn handle_line(service: &RelayService, line: &str) -> Value {
    let command: StreamCommand = match serde_json::from_str(line) {
        Ok(c) => c,
        Err(e) => return json!({ "kind": "error", "message": format!("invalid command: {e}") }),
    };

    match command {
        StreamCommand::Request { agent, request } => {
            let response = service.dispatch(&agent, request).await;
            json!({ "kind": "response", "response": response })
        }
        StreamCommand::Completion { signal } => {
            match service.intake().submit_value(signal).await {
                Ok(ack) => json!({
                    "kind": "ack",
                    "ack": ack,
                    "digest": ack.to_string(),
                }),
                Err(e) => json!({ "kind": "error", "message": e.to_string() }),
            }
        }
        StreamCommand::Activate { agent } => match service.dispatcher().activate(&agent) {
            Ok(changed) => json!({ "kind": "activated", "agent": agent, "changed": changed }),
            Err(e) => json!({ "kind": "error", "message": e.to_string() }),
        },
        StreamCommand::Deactivate { agent } => match service.dispatcher().deactivate(&agent).await {
            Ok(evicted) => json!({ "kind": "deactivated", "agent": agent, "evicted": evicted }),
            Err(e) => json!({ "kind": "error", "message": e.to_string() }),
        },
        StreamCommand::Active => {
            json!({ "kind": "active", "executions": service.executions().list_active().await })
        }
        StreamCommand::History {
            limit,
            orphans_only,
        } => {
            let mut query = HistoryQuery::new();
            if let Some(limit) = limit {
                query = query.with_limit(limit);
            }
            if orphans_only {
                query = query.orphans_only();
            }
            json!({ "kind": "history", "records": service.history().query(&query) })
        }
        StreamCommand::Stats => json!({ "kind": "stats", "stats": service.history().stats() }),
        StreamCommand::Agents => {
            let agents: Vec<Value> = service
                .dispatcher()
                .describe_agents()
                .into_iter()
                .map(|(descriptor, active)| json!({ "descriptor": descriptor, "active": active }))
                .collect();
            json!({ "kind": "agents", "agents": agents })
        }
    }
}

/// 从 reader 逐行读取命令直到 EOF 或 token 取消
pub async fn run<R, W>(
    service: &RelayService,
    reader: R,
    mut writer: W,
    token: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let output = handle_line(service, line).await;
        writer.write_all(output.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// 便捷函数：把信号构造成一行 completion 命令
pub fn completion_line(signal: &CompletionSignal) -> String {
    json!({ "kind": "completion", "signal": signal }).to_string()
}
