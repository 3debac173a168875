use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Context the validator may forward to the external service. The validator
/// itself is stateless; everything it needs arrives per call.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    pub teacher_id: &'a str,
    pub allocation_id: &'a str,
    pub observed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerdict {
    Verified { student_id: String, qr_secret: String },
    Invalid,
}

pub trait TokenValidator: Send {
    fn validate(&self, payload: &str, ctx: &ScanContext) -> TokenVerdict;
}

/// Offline mode: the payload must be exactly `ENC::<studentId>::<qrSecret>`.
/// Used when no token service is configured.
pub struct FallbackValidator;

impl TokenValidator for FallbackValidator {
    fn validate(&self, payload: &str, _ctx: &ScanContext) -> TokenVerdict {
        let parts: Vec<&str> = payload.split("::").collect();
        if parts.len() != 3 || parts[0] != "ENC" || parts[1].is_empty() || parts[2].is_empty() {
            return TokenVerdict::Invalid;
        }
        TokenVerdict::Verified {
            student_id: parts[1].to_string(),
            qr_secret: parts[2].to_string(),
        }
    }
}

/// Delegated mode: the payload plus context goes to the external token
/// service and its verdict is trusted as-is. Every failure mode of the call
/// (transport, non-2xx, unparsable body, missing fields) maps to Invalid.
pub struct DelegatedValidator {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    payload: &'a str,
    teacher_id: &'a str,
    allocation_id: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    valid: bool,
    student_id: Option<String>,
    qr_secret: Option<String>,
}

impl DelegatedValidator {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl TokenValidator for DelegatedValidator {
    fn validate(&self, payload: &str, ctx: &ScanContext) -> TokenVerdict {
        let url = format!("{}/api/qr/validate", self.base_url);
        let body = ValidateRequest {
            payload,
            teacher_id: ctx.teacher_id,
            allocation_id: ctx.allocation_id,
            timestamp: ctx.observed.to_rfc3339(),
        };

        let resp = match self.client.post(&url).json(&body).send() {
            Ok(r) => r,
            Err(e) => {
                log::warn!("token service unreachable: {}", e);
                return TokenVerdict::Invalid;
            }
        };
        if !resp.status().is_success() {
            log::warn!("token service rejected payload: HTTP {}", resp.status());
            return TokenVerdict::Invalid;
        }
        let parsed: ValidateResponse = match resp.json() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("token service returned malformed body: {}", e);
                return TokenVerdict::Invalid;
            }
        };

        match parsed {
            ValidateResponse {
                valid: true,
                student_id: Some(student_id),
                qr_secret: Some(qr_secret),
            } => TokenVerdict::Verified {
                student_id,
                qr_secret,
            },
            _ => TokenVerdict::Invalid,
        }
    }
}

/// Mode selection happens once at startup; the scan path never re-inspects
/// the environment per request.
pub fn validator_from_env() -> anyhow::Result<Box<dyn TokenValidator>> {
    match std::env::var("ROLLCALL_TOKEN_SERVICE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            log::info!("token validation delegated to {}", url.trim());
            Ok(Box::new(DelegatedValidator::new(url.trim())?))
        }
        _ => {
            log::info!("no token service configured; using offline payload parsing");
            Ok(Box::new(FallbackValidator))
        }
    }
}
