use crate::scan::{OverrideError, ScanError};
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

/// Handler-side failure carried up to the envelope. Domain errors convert
/// into this so handlers can stay on `?`.
pub struct IpcError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl IpcError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn missing(key: &str) -> Self {
        Self::bad_params(format!("missing {}", key))
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for IpcError {
    fn from(e: rusqlite::Error) -> Self {
        IpcError::new("db_query_failed", e.to_string())
    }
}

impl From<ScanError> for IpcError {
    fn from(e: ScanError) -> Self {
        let code = e.code();
        match &e {
            ScanError::Blocked { status } => IpcError::new(code, e.to_string())
                .with_details(json!({ "status": status.as_str() })),
            _ => IpcError::new(code, e.to_string()),
        }
    }
}

impl From<OverrideError> for IpcError {
    fn from(e: OverrideError) -> Self {
        IpcError::new(e.code(), e.to_string())
    }
}
