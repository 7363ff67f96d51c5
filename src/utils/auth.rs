use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Audience of API bearer tokens
const API_AUDIENCE: &str = "api";
/// Audience of the signed OAuth `state` parameter
const CONSENT_AUDIENCE: &str = "drive-consent";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: usize,
    pub aud: String,
    pub jti: String,
}

fn sign(user_id: &str, audience: &str, ttl: Duration, secret: &str) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| anyhow!("invalid token lifetime"))?
        .timestamp();

    let claims = Claims {
        sub: user_id.to_owned(),
        exp: expiration as usize,
        aud: audience.to_owned(),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

fn verify(token: &str, audience: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.set_audience(&[audience]);
    let key = DecodingKey::from_secret(secret.as_ref());
    let token_data = decode::<Claims>(token, &key, &validation)?;
    Ok(token_data.claims)
}

pub fn create_jwt(user_id: &str, secret: &str) -> Result<String> {
    sign(user_id, API_AUDIENCE, Duration::hours(24), secret)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims> {
    verify(token, API_AUDIENCE, secret)
}

/// Signed, short-lived OAuth `state` binding the Drive callback to a user
pub fn create_consent_state(user_id: &str, secret: &str) -> Result<String> {
    sign(user_id, CONSENT_AUDIENCE, Duration::minutes(15), secret)
}

pub fn verify_consent_state(state: &str, secret: &str) -> Result<String> {
    Ok(verify(state, CONSENT_AUDIENCE, secret)?.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_cycle() {
        let secret = "test_secret";
        let user_id = "user_123";
        let token = create_jwt(user_id, secret).unwrap();
        let claims = validate_jwt(&token, secret).unwrap();
        assert_eq!(claims.sub, user_id);
    }

    #[test]
    fn test_consent_state_is_not_an_api_token() {
        let secret = "test_secret";
        let state = create_consent_state("user_123", secret).unwrap();
        assert_eq!(verify_consent_state(&state, secret).unwrap(), "user_123");
        assert!(validate_jwt(&state, secret).is_err());
        assert!(verify_consent_state(&state, "other_secret").is_err());
    }
}
