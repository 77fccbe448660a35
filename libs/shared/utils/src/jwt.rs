use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{AuthError, AuthenticatedUser, JwtClaims, JwtHeader, Role};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

/// Verifies HS256 bearer tokens and mints new ones with the same secret.
#[derive(Clone)]
pub struct TokenValidator {
    secret: String,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator").finish_non_exhaustive()
    }
}

impl TokenValidator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Validate a token and require the caller to hold `required`.
    pub fn validate(&self, token: &str, required: Role) -> Result<AuthenticatedUser, AuthError> {
        self.validate_any(token, &[required])
    }

    /// Validate a token and require the caller to hold one of `accepted`.
    pub fn validate_any(&self, token: &str, accepted: &[Role]) -> Result<AuthenticatedUser, AuthError> {
        let user = validate_token(token, &self.secret)?;
        if !accepted.contains(&user.role) {
            debug!("Role {} rejected, accepted roles: {:?}", user.role, accepted);
            return Err(AuthError::RoleMismatch { actual: user.role });
        }
        Ok(user)
    }

    pub fn issue(&self, subject_id: Uuid, role: Role, ttl: Duration) -> Result<String, AuthError> {
        issue_token(subject_id, role, None, ttl, &self.secret)
    }
}

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<AuthenticatedUser, AuthError> {
    if jwt_secret.is_empty() {
        return Err(AuthError::Invalid("JWT secret is not set".to_string()));
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::Invalid("Invalid token format".to_string()));
    }

    let header_b64 = parts[0];
    let claims_b64 = parts[1];
    let signature_b64 = parts[2];

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|e| {
        debug!("Failed to decode signature: {}", e);
        AuthError::Invalid("Invalid signature encoding".to_string())
    })?;

    let mut mac = HmacSha256::new_from_slice(jwt_secret.as_bytes())
        .map_err(|_| AuthError::Invalid("Failed to create HMAC".to_string()))?;
    mac.update(format!("{}.{}", header_b64, claims_b64).as_bytes());

    if mac.verify_slice(&signature).is_err() {
        debug!("Token signature verification failed");
        return Err(AuthError::Invalid("Invalid token signature".to_string()));
    }

    let header: JwtHeader = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(|| AuthError::Invalid("Invalid token header".to_string()))?;
    if header.alg != ALGORITHM {
        debug!("Token signed with unsupported algorithm {}", header.alg);
        return Err(AuthError::Invalid("Unsupported token algorithm".to_string()));
    }

    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AuthError::Invalid("Invalid claims encoding".to_string()))?;

    let claims: JwtClaims = serde_json::from_str(&claims_json).map_err(|e| {
        debug!("Failed to parse claims: {}", e);
        AuthError::Invalid("Invalid claims format".to_string())
    })?;

    if let Some(exp) = claims.exp {
        let now = Utc::now().timestamp().max(0) as u64;
        if exp < now {
            debug!("Token expired at {} (now: {})", exp, now);
            return Err(AuthError::Expired);
        }
    }

    let subject_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AuthError::Invalid("Subject is not a valid id".to_string()))?;

    let role = claims
        .role
        .as_deref()
        .ok_or_else(|| AuthError::Invalid("Token carries no role".to_string()))?
        .parse::<Role>()?;

    let issued_at = claims
        .iat
        .and_then(|timestamp| Utc.timestamp_opt(timestamp as i64, 0).single());

    let user = AuthenticatedUser {
        subject_id,
        role,
        email: claims.email,
        issued_at,
    };

    debug!("Token validated successfully for {} {}", user.role, user.subject_id);
    Ok(user)
}

pub fn issue_token(
    subject_id: Uuid,
    role: Role,
    email: Option<&str>,
    ttl: Duration,
    jwt_secret: &str,
) -> Result<String, AuthError> {
    if jwt_secret.is_empty() {
        return Err(AuthError::Invalid("JWT secret is not set".to_string()));
    }

    let now = Utc::now();
    let exp = now + ttl;

    let header = JwtHeader {
        alg: ALGORITHM.to_string(),
        typ: "JWT".to_string(),
    };
    let header_json = serde_json::to_string(&header)
        .map_err(|e| AuthError::Invalid(format!("Failed to encode header: {}", e)))?;

    let mut payload = json!({
        "sub": subject_id.to_string(),
        "role": role.to_string(),
        "iat": now.timestamp(),
        "exp": exp.timestamp(),
    });
    if let Some(email) = email {
        payload["email"] = json!(email);
    }

    let header_encoded = URL_SAFE_NO_PAD.encode(header_json);
    let payload_encoded = URL_SAFE_NO_PAD.encode(payload.to_string());
    let signing_input = format!("{}.{}", header_encoded, payload_encoded);

    let mut mac = HmacSha256::new_from_slice(jwt_secret.as_bytes())
        .map_err(|_| AuthError::Invalid("Failed to create HMAC".to_string()))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}
