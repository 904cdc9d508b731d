use serde::{Deserialize, Serialize};

use latchkey_core::policy::DEFAULT_STORE_ID;

fn default_store_id() -> String {
    DEFAULT_STORE_ID.to_string()
}

fn validate_keys(keys: &[String]) -> Result<(), String> {
    if keys.is_empty() {
        return Err("keys must not be empty".to_string());
    }
    if let Some(i) = keys.iter().position(|k| k.is_empty()) {
        return Err(format!("keys[{}] must not be empty", i));
    }
    Ok(())
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AcquireLockRequest {
    pub keys: Vec<String>,
    #[serde(default = "default_store_id")]
    pub store_id: String,
    pub lease_ms: u64,
}

impl AcquireLockRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_keys(&self.keys)?;
        if self.lease_ms == 0 {
            return Err("lease_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct ReleaseLockRequest {
    pub keys: Vec<String>,
    #[serde(default = "default_store_id")]
    pub store_id: String,
    pub token: String,
}

impl ReleaseLockRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_keys(&self.keys)?;
        if self.token.is_empty() {
            return Err("token is required".to_string());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct ExtendLockRequest {
    pub keys: Vec<String>,
    #[serde(default = "default_store_id")]
    pub store_id: String,
    pub token: String,
    pub lease_ms: u64,
}

impl ExtendLockRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_keys(&self.keys)?;
        if self.token.is_empty() {
            return Err("token is required".to_string());
        }
        if self.lease_ms == 0 {
            return Err("lease_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
pub struct LockResponse {
    pub token: String,
    pub keys: Vec<String>,
    pub store_id: String,
    pub expires_in_ms: u64,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub released: bool,
}

#[derive(Serialize)]
pub struct ExtendResponse {
    pub extended: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub version: String,
}
