use std::path::PathBuf;

use crate::token::TokenValidator;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Chosen once at startup (delegated vs. offline); never re-selected
    /// per request.
    pub validator: Box<dyn TokenValidator>,
}
