//! Bearer-token extractor for the internal endpoints.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use vigil_pipeline::Backend;

use crate::{AppState, error::ApiError};

/// The trigger secret, held only as an argon2 PHC string.
#[derive(Clone)]
pub struct AuthConfig {
  pub token_hash: String,
}

/// Zero-size marker: present in the handler means the request was authenticated.
pub struct Authenticated;

/// Check `Authorization: Bearer <secret>` against the configured hash. An
/// empty or unparsable hash rejects everything.
pub fn verify_bearer(headers: &HeaderMap, config: &AuthConfig) -> Result<(), ApiError> {
  let token = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .ok_or(ApiError::Unauthorized)?;

  let parsed = PasswordHash::new(&config.token_hash).map_err(|_| ApiError::Unauthorized)?;
  Argon2::default()
    .verify_password(token.as_bytes(), &parsed)
    .map_err(|_| ApiError::Unauthorized)
}

impl<S: Backend> FromRequestParts<AppState<S>> for Authenticated {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    verify_bearer(&parts.headers, &state.auth)?;
    Ok(Authenticated)
  }
}

#[cfg(test)]
mod tests {
  use argon2::{PasswordHasher, password_hash::SaltString};
  use axum::http::HeaderValue;
  use rand_core::OsRng;

  use super::*;

  fn config(secret: &str) -> AuthConfig {
    let salt = SaltString::generate(&mut OsRng);
    let token_hash = Argon2::default()
      .hash_password(secret.as_bytes(), &salt)
      .unwrap()
      .to_string();
    AuthConfig { token_hash }
  }

  fn headers(value: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    h
  }

  #[test]
  fn correct_token() {
    assert!(verify_bearer(&headers("Bearer s3cret"), &config("s3cret")).is_ok());
  }

  #[test]
  fn wrong_token() {
    assert!(matches!(
      verify_bearer(&headers("Bearer nope"), &config("s3cret")),
      Err(ApiError::Unauthorized)
    ));
  }

  #[test]
  fn wrong_scheme_or_missing_header() {
    let cfg = config("s3cret");
    assert!(verify_bearer(&headers("Basic s3cret"), &cfg).is_err());
    assert!(verify_bearer(&HeaderMap::new(), &cfg).is_err());
  }

  #[test]
  fn unconfigured_hash_rejects_everything() {
    let cfg = AuthConfig { token_hash: String::new() };
    assert!(verify_bearer(&headers("Bearer anything"), &cfg).is_err());
  }
}
