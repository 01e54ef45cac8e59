use crate::error::ChainError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn chain_err(id: &str, e: &ChainError) -> serde_json::Value {
    let details = match e {
        ChainError::UnknownLevel { index, len } => json!({ "levelIndex": index, "levelCount": len }),
        ChainError::InvalidSelection { level, value } => json!({ "level": level, "value": value }),
        ChainError::MissingParent { level } => json!({ "level": level }),
        ChainError::NotRetryable { level, state } => json!({ "level": level, "state": state }),
    };
    err(id, e.code(), e.to_string(), Some(details))
}
