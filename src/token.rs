//! Manage session json web tokens.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::config::Token as TokenConfig;
use crate::error::Result;

const DEFAULT_AUDIENCE: &str = "astra";
/// 100 hours.
const DEFAULT_EXPIRATION_TIME: u64 = 60 * 60 * 100;

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Expiration time, in seconds since the epoch.
    pub exp: u64,
    /// Issuance time, in seconds since the epoch.
    pub iat: u64,
    /// Organization that issued the JWT.
    pub iss: String,
    /// User serial number.
    pub sub: String,
}

/// Issue and check HS256 session tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expires_in: u64,
}

impl TokenManager {
    /// Create a new [`TokenManager`] signing with `secret`.
    pub fn new(issuer: &str, secret: &[u8], config: Option<&TokenConfig>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_owned(),
            audience: config
                .and_then(|c| c.audience.clone())
                .unwrap_or_else(|| DEFAULT_AUDIENCE.to_owned()),
            expires_in: config
                .and_then(|c| c.expires_in)
                .unwrap_or(DEFAULT_EXPIRATION_TIME),
        }
    }

    /// Token lifetime in seconds.
    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// Create a token for the user identified by `serial_number`.
    pub fn create(&self, serial_number: &str) -> Result<String> {
        let now = Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            aud: self.audience.clone(),
            exp: now + self.expires_in,
            iat: now,
            iss: self.issuer.clone(),
            sub: serial_number.to_owned(),
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        Ok(decode::<Claims>(token, &self.decoding, &validation)?.claims)
    }
}
