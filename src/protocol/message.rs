//! 请求 / 响应信封
//!
//! Request 由调用方构造并只被消费一次；Response 回显 Request.id，result 与 error 二选一，创建后不再修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{ErrorObject, ProtocolError};

/// 分发请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
            timestamp: Utc::now(),
        }
    }
}

/// 分发响应；字段私有，保证 result / error 互斥
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
    timestamp: DateTime<Utc>,
}

impl Response {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(id: impl Into<String>, error: &ProtocolError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.to_wire()),
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
