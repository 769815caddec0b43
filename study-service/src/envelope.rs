//! The single reply every dispatched request produces.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_ERROR: &str = "Request failed";

/// `{ success, data?, error?, cached? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only serialized when true
    #[serde(default, skip_serializing_if = "is_false")]
    pub cached: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ResponseEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            cached: false,
        }
    }

    /// Success with no payload
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            cached: false,
        }
    }

    pub fn cached(data: Value) -> Self {
        Self {
            cached: true,
            ..Self::ok(data)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = DEFAULT_ERROR.to_string();
        }
        Self {
            success: false,
            data: None,
            error: Some(message),
            cached: false,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "error": e.to_string() })
        })
    }
}
