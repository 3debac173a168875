use super::error::IpcError;
use super::types::AppState;
use chrono::NaiveDate;
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, IpcError> {
    state
        .db
        .as_ref()
        .ok_or_else(|| IpcError::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, IpcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IpcError::missing(key))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, IpcError> {
    parse_date(&required_str(params, key)?, key)
}

pub fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, IpcError> {
    optional_str(params, key)
        .map(|s| parse_date(&s, key))
        .transpose()
}

fn parse_date(s: &str, key: &str) -> Result<NaiveDate, IpcError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| IpcError::bad_params(format!("{} must be YYYY-MM-DD", key)))
}
