use anyhow::anyhow;
use std::env;

const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

#[derive(Clone)]
pub struct AppConfig {
    pub upstream_api_key: String,
    pub upstream_base_url: String,
    pub chat_model: String,
    pub database_url: String,
    pub cache_ttl_seconds: i64,
    pub rate_limit: u32,
    pub rate_limit_window_seconds: i64,
}

impl AppConfig {
    pub fn new() -> Result<Self, anyhow::Error> {
        let upstream_api_key =
            env::var("UPSTREAM_API_KEY").map_err(|_| anyhow!("UPSTREAM_API_KEY not found"))?;

        let upstream_base_url = env::var("UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_UPSTREAM_BASE_URL.to_string());

        let chat_model = env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());

        let database_url =
            env::var("DATABASE_URL").map_err(|_| anyhow!("DATABASE_URL not found"))?;

        let cache_ttl_seconds = env::var("CACHE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        let rate_limit = env::var("RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let rate_limit_window_seconds = env::var("RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Ok(AppConfig {
            upstream_api_key,
            upstream_base_url,
            chat_model,
            database_url,
            cache_ttl_seconds,
            rate_limit,
            rate_limit_window_seconds,
        })
    }
}
