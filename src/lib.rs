use async_openai::config::OpenAIConfig;
use async_openai::Client;
use sqlx::PgPool;

pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod prompts;
pub mod ranking;
pub mod routes;
pub mod session;
pub mod sse;
pub mod types;
pub mod upstream;

use cache::QueryCache;
use config::AppConfig;

pub struct AppState {
    pub pool: PgPool,
    pub http_client: reqwest::Client,
    pub advisor_client: Client<OpenAIConfig>,
    pub cache: QueryCache,
    pub config: AppConfig,
}
