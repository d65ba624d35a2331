use crate::{
    auth::{
        auth::AuthUser,
        jwt::{TokenSubject, generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, verify_password},
    },
    config::Config,
    error::AppError,
    model::role::{Capability, Role},
    models::{CreateUserReq, LoginReqDto, TokenType, UserSql},
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
    pub employee_id: Option<u64>,
    pub capabilities: Vec<Capability>,
}

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Issues a fresh access/refresh pair and records the refresh `jti`.
async fn issue_tokens(
    subject: &TokenSubject,
    pool: &MySqlPool,
    config: &Config,
) -> Result<LoginResponse, AppError> {
    let access_token = generate_access_token(subject, &config.jwt_secret, config.access_token_ttl)
        .map_err(|e| AppError::Internal(e.into()))?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(subject, &config.jwt_secret, config.refresh_token_ttl)
            .map_err(|e| AppError::Internal(e.into()))?;

    debug!(user_id = subject.user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(subject.user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(pool)
    .await?;

    Ok(LoginResponse {
        access_token,
        refresh_token,
    })
}

/// Login with username and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Token pair issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        return Err(AppError::BadRequest("Username or password required".into()));
    }

    let db_user = sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, username, password, role_id, employee_id, is_active
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(user.username.trim())
    .fetch_optional(pool.get_ref())
    .await?;

    let db_user = match db_user {
        Some(u) if u.is_active => u,
        _ => {
            info!("Invalid credentials: unknown or inactive user");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        }
    };

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    let subject = TokenSubject {
        user_id: db_user.id,
        username: db_user.username,
        role: db_user.role_id,
        employee_id: db_user.employee_id,
    };
    let tokens = issue_tokens(&subject, pool.get_ref(), config.get_ref()).await?;

    // not fatal for the login itself
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(subject.user_id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!("Login successful");
    Ok(HttpResponse::Ok().json(tokens))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = LoginResponse),
        (status = 401, description = "Refresh token invalid, expired or revoked")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let token = bearer(&req).ok_or_else(|| AppError::Unauthorized("No token".into()))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid token".into()))?;

    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthorized("Refresh token required".into()));
    }

    // revoke the presented token; zero rows means unknown or already used
    let revoked = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ? AND revoked = FALSE")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await?;
    if revoked.rows_affected() == 0 {
        return Err(AppError::Unauthorized("Refresh token revoked".into()));
    }

    let subject = TokenSubject {
        user_id: claims.user_id,
        username: claims.sub,
        role: claims.role,
        employee_id: claims.employee_id,
    };
    let tokens = issue_tokens(&subject, pool.get_ref(), config.get_ref()).await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// Revoke a refresh token (idempotent)
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let claims = match bearer(&req).map(|t| verify_token(t, &config.jwt_secret)) {
        Some(Ok(c)) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

/// Current caller and what it may do
#[utoipa::path(
    get,
    path = "/api/me",
    responses((status = 200, body = MeResponse), (status = 401)),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(auth: AuthUser) -> impl Responder {
    HttpResponse::Ok().json(MeResponse {
        user_id: auth.user_id,
        username: auth.username,
        role: auth.role,
        employee_id: auth.employee_id,
        capabilities: auth.role.capabilities().to_vec(),
    })
}

/// Create a login account (HR/Admin)
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserReq,
    responses(
        (status = 201, description = "User created"),
        (status = 409, description = "Username already taken"),
        (status = 422, description = "Validation failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUserReq>,
) -> Result<HttpResponse, AppError> {
    auth.require(Capability::Configure)?;
    payload.validate()?;

    if Role::from_id(payload.role_id).is_none() {
        return Err(AppError::field("role_id", "Unknown role"));
    }

    let hashed = hash_password(&payload.password).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let result = sqlx::query("INSERT INTO users (username, password, role_id, employee_id) VALUES (?, ?, ?, ?)")
        .bind(payload.username.trim())
        .bind(hashed)
        .bind(payload.role_id)
        .bind(payload.employee_id)
        .execute(pool.get_ref())
        .await;

    match result {
        Ok(done) => Ok(HttpResponse::Created().json(json!({
            "message": "User created",
            "id": done.last_insert_id()
        }))),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(AppError::Conflict("Username already taken".into()))
        }
        Err(e) => Err(e.into()),
    }
}
