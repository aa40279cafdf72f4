use chrono::{TimeZone, Utc};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{JwtClaims, User};

/// Validate an HS256 bearer token and resolve the caller identity it carries.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        debug!("Token rejected: {}", e);
        match e.kind() {
            ErrorKind::ExpiredSignature => "Token expired".to_string(),
            ErrorKind::InvalidSignature => "Invalid token signature".to_string(),
            _ => "Invalid token format".to_string(),
        }
    })?;

    let claims = data.claims;

    let id = Uuid::parse_str(&claims.sub)
        .map_err(|_| "Token subject is not a valid user id".to_string())?;

    let role = claims
        .application_role()
        .ok_or_else(|| "Token does not carry a clinic role".to_string())?;

    let created_at = claims
        .iat
        .and_then(|timestamp| Utc.timestamp_opt(timestamp as i64, 0).single());

    let user = User {
        id,
        email: claims.email,
        role,
        created_at,
    };

    debug!("Token validated successfully for {} {}", user.role, user.id);
    Ok(user)
}
