use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ready, Ready};

/// Caller identity for ownership checks. Session verification itself is the
/// managed backend's job; this extractor only reads the identity it forwards.
pub struct RequestUser {
    pub user_id: String,
}

impl FromRequest for RequestUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user_id = req
            .headers()
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("anonymous")
            .to_string();

        ready(Ok(RequestUser { user_id }))
    }
}
