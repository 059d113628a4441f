use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{CacheGetResponse, CacheSetResponse, RateLimitResponse};

/// Hex characters kept from the sha256 digest. Deliberately short: the key is
/// a lookup handle for natural-language queries, not a uniqueness guarantee.
const HASH_PREFIX_LEN: usize = 16;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hit_count: u64,
}

#[derive(Debug, Clone)]
struct RateWindow {
    window_start: DateTime<Utc>,
    count: u32,
}

/// Hash-keyed answer cache with TTL expiry plus a fixed-window rate counter.
/// One generic key-value store; last writer wins, duplicate cleanup sweeps
/// are harmless.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

/// Stable cache key for a query: whitespace-collapsed lowercase text, sha256,
/// truncated hex. Collisions across distinct queries are an accepted risk.
pub fn query_hash(query: &str) -> String {
    let normalized = query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let digest = Sha256::digest(normalized.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_PREFIX_LEN);
    hash
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hit requires a stored entry whose expiry has not passed. Expired
    /// entries are left for `clear_expired`; they still read as misses.
    pub async fn get(&self, key: &str) -> CacheGetResponse {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if Utc::now() < entry.expires_at => {
                entry.hit_count += 1;
                CacheGetResponse {
                    hit: true,
                    value: Some(entry.value.clone()),
                    hit_count: Some(entry.hit_count),
                    created_at: Some(entry.created_at),
                }
            }
            _ => CacheGetResponse {
                hit: false,
                value: None,
                hit_count: None,
                created_at: None,
            },
        }
    }

    /// Upserts: any prior entry for the key is overwritten.
    pub async fn set(&self, key: &str, value: Value, ttl_seconds: i64) -> CacheSetResponse {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds);

        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                expires_at,
                hit_count: 0,
            },
        );

        CacheSetResponse {
            success: true,
            expires_at,
        }
    }

    /// Idempotent: deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    /// Cleanup sweep. Safe to call repeatedly and concurrently; partial
    /// progress on failure is acceptable.
    pub async fn clear_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Cleared {} expired cache entries", removed);
        }
        removed
    }

    /// Fixed-window counter. The first request in a window resets it; requests
    /// past the limit are reported but not counted.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: u32,
        window_seconds: i64,
    ) -> RateLimitResponse {
        let now = Utc::now();
        let window = Duration::seconds(window_seconds);

        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_insert(RateWindow {
            window_start: now,
            count: 0,
        });

        if now >= entry.window_start + window {
            entry.window_start = now;
            entry.count = 0;
        }

        let allowed = entry.count < limit;
        if allowed {
            entry.count += 1;
        }

        RateLimitResponse {
            allowed,
            current: entry.count,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.window_start + window,
        }
    }
}
