use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::ids::{TenantId, UserId};

const JWT_LEEWAY: u64 = 60;
pub const ACCESS_TOKEN_EXPIRATION: i64 = 30 * 60; // 30 minutes

/// Claims carried by the access tokens the external identity service issues.
///
/// The hub rejects a connection whose `tenant_id` claim mismatches the
/// tenant in the WebSocket path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
  pub sub: UserId,
  pub tenant_id: TenantId,
  pub exp: i64,
  pub iat: i64,
}

/// Verifies (and, for tests and tooling, issues) access tokens
#[derive(Clone)]
pub struct TokenManager {
  encoding_key: EncodingKey,
  decoding_key: DecodingKey,
  validation: Validation,
}

impl TokenManager {
  pub fn new(secret: &str) -> Result<Self, CoreError> {
    if secret.trim().is_empty() {
      return Err(CoreError::Validation(
        "jwt secret must not be empty".to_string(),
      ));
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = JWT_LEEWAY;
    validation.validate_exp = true;

    Ok(Self {
      encoding_key: EncodingKey::from_secret(secret.as_bytes()),
      decoding_key: DecodingKey::from_secret(secret.as_bytes()),
      validation,
    })
  }

  pub fn verify_token(&self, token: &str) -> Result<AccessClaims, CoreError> {
    decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
      .map(|data| data.claims)
      .map_err(|e| CoreError::Authentication(e.to_string()))
  }

  pub fn generate_token(&self, user_id: UserId, tenant_id: TenantId) -> Result<String, CoreError> {
    let now = Utc::now().timestamp();
    let claims = AccessClaims {
      sub: user_id,
      tenant_id,
      exp: now + ACCESS_TOKEN_EXPIRATION,
      iat: now,
    };

    encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
      .map_err(|e| CoreError::Internal(e.to_string()))
  }
}

/// Implemented by the server state so middleware and the hub can verify
/// tokens without knowing the state's shape
pub trait TokenVerifier {
  type Error;

  fn verify_token(&self, token: &str) -> Result<AccessClaims, Self::Error>;
}
