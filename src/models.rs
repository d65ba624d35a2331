use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "jane.doe")]
    pub username: String,
    #[schema(example = "s3cret!")]
    pub password: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateUserReq {
    #[validate(length(min = 3, max = 100, message = "Username must be 3-100 characters"))]
    #[schema(example = "jane.doe")]
    pub username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[schema(example = 3)]
    pub role_id: u8,
    #[schema(example = 1000)]
    pub employee_id: Option<u64>,
}

#[derive(FromRow)]
pub struct UserSql {
    pub id: u64, // BIGINT UNSIGNED
    pub username: String,
    pub password: String,
    pub role_id: u8,
    pub employee_id: Option<u64>,
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: u8, // role id
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub enum TokenType {
    Access,
    Refresh,
}
