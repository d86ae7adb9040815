//! 请求 / 响应协议、方法分发与 NDJSON 命令流

pub mod dispatcher;
pub mod message;
pub mod stream;

pub use dispatcher::{Dispatcher, AGENT_DEACTIVATED};
pub use message::{Request, Response};
pub use stream::StreamCommand;
