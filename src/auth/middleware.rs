use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?;

    let reject = |req: ServiceRequest, message: &str| -> Result<ServiceResponse<BoxBody>, Error> {
        let resp = AppError::Unauthorized(message.to_string()).error_response();
        Ok(req.into_response(resp))
    };

    let header_value = match req.headers().get("Authorization") {
        Some(h) => match h.to_str() {
            Ok(v) => v,
            Err(_) => return reject(req, "Invalid Authorization header encoding"),
        },
        None => return reject(req, "Missing Authorization header"),
    };

    let token = match header_value.strip_prefix("Bearer ") {
        Some(t) => t,
        None => return reject(req, "Authorization header must start with Bearer"),
    };

    let auth_user = match verify_token(token, &config.jwt_secret) {
        Ok(claims) => match AuthUser::from_claims(claims) {
            Ok(user) => user,
            Err(e) => return reject(req, &e.to_string()),
        },
        Err(e) => {
            tracing::debug!(error = %e, "Rejected token");
            return reject(req, "Invalid or expired token");
        }
    };

    req.extensions_mut().insert(auth_user);

    next.call(req).await
}
