use actix_web::{post, web, Error, HttpResponse};
use serde_json::json;
use std::sync::Arc;

use crate::types::{CacheOperation, CacheOperationRequest, ClearExpiredResponse};
use crate::AppState;

fn required_key(key: Option<String>) -> Result<String, Error> {
    key.filter(|k| !k.is_empty())
        .ok_or_else(|| actix_web::error::ErrorBadRequest("key is required for this operation"))
}

/// Single cache service endpoint, dispatched by `operation`. One generic
/// key-value store backs every operation.
#[post("/cache")]
pub async fn cache_service(
    app_state: web::Data<Arc<AppState>>,
    web::Json(request): web::Json<CacheOperationRequest>,
) -> Result<HttpResponse, Error> {
    let cache = &app_state.cache;
    let config = &app_state.config;

    let response = match request.operation {
        CacheOperation::Get => {
            let key = required_key(request.key)?;
            HttpResponse::Ok().json(cache.get(&key).await)
        }
        CacheOperation::Set => {
            let key = required_key(request.key)?;
            let value = request
                .value
                .ok_or_else(|| actix_web::error::ErrorBadRequest("value is required for set"))?;
            let ttl = request.ttl_seconds.unwrap_or(config.cache_ttl_seconds);
            HttpResponse::Ok().json(cache.set(&key, value, ttl).await)
        }
        CacheOperation::Delete => {
            let key = required_key(request.key)?;
            cache.delete(&key).await;
            HttpResponse::Ok().json(json!({ "success": true }))
        }
        CacheOperation::CheckRateLimit => {
            let key = required_key(request.key)?;
            let limit = request.limit.unwrap_or(config.rate_limit);
            let window = request
                .window_seconds
                .unwrap_or(config.rate_limit_window_seconds);
            HttpResponse::Ok().json(cache.check_rate_limit(&key, limit, window).await)
        }
        CacheOperation::ClearExpired => {
            let removed = cache.clear_expired().await;
            HttpResponse::Ok().json(ClearExpiredResponse { removed })
        }
    };

    Ok(response)
}
