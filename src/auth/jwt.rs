use crate::models::{Claims, TokenType};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

/// Identity baked into every token.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: u64,
    pub username: String,
    pub role: u8,
    pub employee_id: Option<u64>,
}

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

fn claims_for(subject: &TokenSubject, token_type: TokenType, ttl: usize) -> Claims {
    Claims {
        user_id: subject.user_id,
        sub: subject.username.clone(),
        role: subject.role,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
        employee_id: subject.employee_id,
    }
}

pub fn generate_access_token(subject: &TokenSubject, secret: &str, ttl: usize) -> Result<String, Error> {
    let claims = claims_for(subject, TokenType::Access, ttl);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

pub fn generate_refresh_token(subject: &TokenSubject, secret: &str, ttl: usize) -> Result<(String, Claims), Error> {
    let claims = claims_for(subject, TokenType::Refresh, ttl);
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;
    Ok((token, claims))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
pub(crate) fn test_token(user_id: u64, role: u8, employee_id: Option<u64>, secret: &str) -> String {
    let subject = TokenSubject {
        user_id,
        username: format!("user{user_id}"),
        role,
        employee_id,
    };
    generate_access_token(&subject, secret, 600).unwrap()
}
