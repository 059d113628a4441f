use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOperation {
    Get,
    Set,
    Delete,
    CheckRateLimit,
    ClearExpired,
}

#[derive(Deserialize)]
pub struct CacheOperationRequest {
    pub operation: CacheOperation,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub window_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CacheGetResponse {
    pub hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CacheSetResponse {
    pub success: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ClearExpiredResponse {
    pub removed: usize,
}
