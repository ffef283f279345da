use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Principal, Role};
use crate::config::env_or;
use crate::errors::AppError;
use crate::models::user::{AuthResponse, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        if secret.is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }
        let access_minutes: i64 = env_or("JWT_EXP_MINUTES", 15)?;
        let refresh_hours: i64 = env_or("JWT_REFRESH_EXP_HOURS", 24 * 7)?;
        if access_minutes <= 0 || refresh_hours <= 0 {
            return Err(AppError::configuration("token lifetimes must be positive"));
        }

        Ok(Self {
            secret: Arc::new(secret.into_bytes()),
            access_ttl: Duration::minutes(access_minutes),
            refresh_ttl: Duration::hours(refresh_hours),
        })
    }

    pub fn encode(&self, user: &User, kind: TokenKind) -> Result<String, AppError> {
        let now = Utc::now();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };

        let claims = Claims {
            sub: user.id,
            org: user.organization_id,
            role: user.role,
            kind,
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    /// Decode and check that the token is of the `expected` kind.
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let claims = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))?;

        if claims.kind != expected {
            return Err(AppError::token("wrong token type"));
        }
        Ok(claims)
    }

    /// Access and refresh tokens for `user`.
    pub fn issue(&self, user: User) -> Result<AuthResponse, AppError> {
        Ok(AuthResponse {
            access_token: self.encode(&user, TokenKind::Access)?,
            refresh_token: self.encode(&user, TokenKind::Refresh)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
            user,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub org: Uuid,
    pub role: Role,
    pub kind: TokenKind,
    pub exp: usize,
    pub iat: usize,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal::new(claims.sub, claims.org, claims.role)
    }
}

/// Authenticated caller, taken from the access token alone.
#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token, TokenKind::Access)?;
        Ok(claims.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::utc_now;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: Arc::new(b"unit-test-secret".to_vec()),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::hours(1),
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".into(),
            full_name: "Ada".into(),
            role: Role::Analyst,
            organization_id: Uuid::new_v4(),
            created_at: utc_now(),
        }
    }

    #[test]
    fn access_token_carries_tenant_and_role() {
        let config = config();
        let user = user();
        let token = config.encode(&user, TokenKind::Access).unwrap();
        let principal: Principal = config.decode(&token, TokenKind::Access).unwrap().into();

        assert_eq!(principal.user_id, user.id);
        assert_eq!(principal.organization_id, user.organization_id);
        assert_eq!(principal.role, Role::Analyst);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let config = config();
        let pair = config.issue(user()).unwrap();

        assert!(matches!(
            config.decode(&pair.refresh_token, TokenKind::Access),
            Err(AppError::Token(_))
        ));
        assert!(config.decode(&pair.refresh_token, TokenKind::Refresh).is_ok());
        assert_eq!(pair.expires_in, 900);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let token = config().encode(&user(), TokenKind::Access).unwrap();
        let other = JwtConfig {
            secret: Arc::new(b"another-secret".to_vec()),
            ..config()
        };
        assert!(other.decode(&token, TokenKind::Access).is_err());
    }
}
