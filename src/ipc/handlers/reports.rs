use crate::ipc::error::{ok, IpcError};
use crate::ipc::helpers::{db_conn, optional_date, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::reports::{attendance_summary, defaulters, ReportFilters, DEFAULT_DEFAULTER_THRESHOLD};
use rusqlite::Connection;
use serde_json::json;

fn parse_filters(params: &serde_json::Value) -> Result<ReportFilters, IpcError> {
    Ok(ReportFilters {
        department: optional_str(params, "department"),
        section: optional_str(params, "section"),
        subject: optional_str(params, "subject"),
        from: optional_date(params, "fromDate")?,
        to: optional_date(params, "toDate")?,
    })
}

fn reports_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let filters = parse_filters(params)?;
    let summary = attendance_summary(conn, &filters)?;
    serde_json::to_value(&summary).map_err(|e| IpcError::new("db_query_failed", e.to_string()))
}

fn reports_defaulters(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let filters = parse_filters(params)?;
    let threshold = match params.get("threshold") {
        None => DEFAULT_DEFAULTER_THRESHOLD,
        Some(v) => v
            .as_u64()
            .and_then(|t| u32::try_from(t).ok())
            .filter(|t| *t <= 100)
            .ok_or_else(|| IpcError::bad_params("threshold must be an integer 0..=100"))?,
    };

    let list = defaulters(conn, &filters, threshold)?;
    let defaulters_json = list
        .iter()
        .map(|d| serde_json::to_value(d).unwrap_or_else(|_| json!({})))
        .collect::<Vec<_>>();
    Ok(json!({ "threshold": threshold, "defaulters": defaulters_json }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, IpcError> {
    let conn = db_conn(state)?;
    match req.method.as_str() {
        "reports.summary" => reports_summary(conn, &req.params),
        "reports.defaulters" => reports_defaulters(conn, &req.params),
        _ => unreachable!("router only sends report methods"),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.summary" | "reports.defaulters" => Some(match dispatch(state, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
