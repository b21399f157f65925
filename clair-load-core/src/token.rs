//! Bearer tokens for the scanner's pre-shared-key authentication.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

pub const ISSUER: &str = "clairctl";
pub const VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("pre-shared key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
}

/// Mint an HS256 token valid from now for [`VALIDITY`].
pub fn mint(psk: &str) -> Result<String, TokenError> {
    mint_at(psk, SystemTime::now())
}

pub fn mint_at(psk: &str, now: SystemTime) -> Result<String, TokenError> {
    let key = STANDARD.decode(psk)?;

    let iat = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let claims = Claims {
        iss: ISSUER.to_string(),
        iat,
        nbf: iat,
        exp: iat + VALIDITY.as_secs(),
    };

    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&key),
    )?;
    Ok(token)
}
