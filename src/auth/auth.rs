use crate::config::Config;
use crate::error::AppError;
use crate::model::leave_request::Actor;
use crate::model::role::{Capability, Role};
use crate::models::{Claims, TokenType};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

use super::jwt::verify_token;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,

    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

impl AuthUser {
    /// Builds the caller from an access token's claims.
    pub fn from_claims(claims: Claims) -> Result<Self, AppError> {
        if claims.token_type != TokenType::Access {
            return Err(AppError::Unauthorized("Access token required".into()));
        }
        let role = Role::from_id(claims.role).ok_or_else(|| AppError::Unauthorized("Invalid role".into()))?;

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
            employee_id: claims.employee_id,
        })
    }

    pub fn actor(&self) -> Actor {
        Actor {
            employee_id: self.employee_id,
            role: self.role,
        }
    }

    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.role.has(capability) {
            Ok(())
        } else {
            Err(AppError::Forbidden("You do not have permission to perform this action".into()))
        }
    }

    /// Employee profile id; leave is always applied for by an employee.
    pub fn require_employee(&self) -> Result<u64, AppError> {
        self.employee_id
            .ok_or_else(|| AppError::Forbidden("No employee profile".into()))
    }
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // set by auth_middleware on protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(AppError::Unauthorized("Missing token".into()))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => return ready(Err(AppError::Internal(anyhow::anyhow!("Config missing")))),
        };

        ready(
            verify_token(token, &config.jwt_secret)
                .map_err(|_| AppError::Unauthorized("Invalid token".into()))
                .and_then(AuthUser::from_claims),
        )
    }
}
