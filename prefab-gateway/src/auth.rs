//! Bearer Token Authentication
//!
//! Verifies signed JWTs against a configured algorithm and the fixed
//! `prefab-gateway` audience, and turns the claims into an [`Identity`].
//! Token issuance belongs to an external identity provider;
//! [`generate_jwt_token`] exists for tooling and tests.

use crate::constants::{
    DEFAULT_JWT_EXPIRATION_SECS, DEFAULT_JWT_LEEWAY_SECS, INSECURE_DEFAULT_JWT_SECRET,
    JWT_AUDIENCE, MIN_JWT_SECRET_LENGTH,
};
use crate::error::{ApiError, ApiResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use prefab_core::Identity;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// CLOCK ABSTRACTION
// ============================================================================

/// Clock used for `exp`/`nbf` checks.
///
/// Time validation is done here rather than inside `jsonwebtoken` so tests
/// can pin the clock.
pub trait JwtClock: Send + Sync {
    /// Current time as Unix epoch seconds. Negative on a pre-1970 clock.
    fn now_epoch_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}


// ============================================================================
// JWT SECRET
// ============================================================================

/// JWT signing secret with redacted `Debug`.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Blank input falls back to the insecure development default, which
    /// production validation refuses.
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if secret.trim().is_empty() {
            Self(SecretString::new(INSECURE_DEFAULT_JWT_SECRET.into()))
        } else {
            Self(SecretString::new(secret.into()))
        }
    }

    /// Expose the secret value (only for cryptographic operations).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_JWT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: JwtSecret,

    /// JWT algorithm (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// Lifetime of tokens minted by [`generate_jwt_token`].
    pub jwt_expiration_secs: i64,

    /// Tolerated clock skew for `exp`/`nbf`, in seconds.
    pub jwt_leeway_secs: i64,

    /// Required `aud` claim.
    pub audience: String,

    pub clock: Arc<dyn JwtClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_expiration_secs", &self.jwt_expiration_secs)
            .field("jwt_leeway_secs", &self.jwt_leeway_secs)
            .field("audience", &self.audience)
            .field("clock", &"<JwtClock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let secret = std::env::var("PREFAB_JWT_SECRET").unwrap_or_default();
        Self {
            jwt_secret: JwtSecret::new(secret),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: DEFAULT_JWT_EXPIRATION_SECS,
            jwt_leeway_secs: DEFAULT_JWT_LEEWAY_SECS,
            audience: JWT_AUDIENCE.to_string(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Build from environment variables.
    ///
    /// - `PREFAB_JWT_SECRET`: signing secret
    /// - `PREFAB_JWT_ALGORITHM`: HS256 | HS384 | HS512 (default: HS256)
    /// - `PREFAB_JWT_LEEWAY_SECS`: clock skew tolerance (default: 60)
    /// - `PREFAB_JWT_EXPIRATION_SECS`: lifetime of minted tokens (default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            jwt_algorithm: std::env::var("PREFAB_JWT_ALGORITHM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jwt_algorithm),
            jwt_leeway_secs: std::env::var("PREFAB_JWT_LEEWAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jwt_leeway_secs),
            jwt_expiration_secs: std::env::var("PREFAB_JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jwt_expiration_secs),
            ..defaults
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = JwtSecret::new(secret);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn JwtClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Refuse insecure settings when `production` is set; warn otherwise.
    pub fn validate_for_production(&self, production: bool) -> ApiResult<()> {
        if !matches!(
            self.jwt_algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(ApiError::invalid_input(format!(
                "JWT algorithm {:?} is not supported with a shared secret",
                self.jwt_algorithm
            )));
        }

        if self.jwt_secret.is_insecure_default() {
            if production {
                return Err(ApiError::invalid_input(
                    "Cannot start in production with the default JWT secret. \
                     Set PREFAB_JWT_SECRET.",
                ));
            }
            tracing::warn!(
                "Using the insecure default JWT secret. Set PREFAB_JWT_SECRET before deploying."
            );
        } else if self.jwt_secret.len() < MIN_JWT_SECRET_LENGTH {
            if production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars, need {}).",
                    self.jwt_secret.len(),
                    MIN_JWT_SECRET_LENGTH
                )));
            }
            tracing::warn!(
                length = self.jwt_secret.len(),
                "JWT secret is short; use at least {} characters in production",
                MIN_JWT_SECRET_LENGTH
            );
        }

        Ok(())
    }
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID). Tokens without one are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience. A string or an array of strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,

    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, config: &AuthConfig) -> Self {
        let now = config.clock.now_epoch_secs();
        Self {
            sub: Some(user_id.into()),
            aud: Some(serde_json::Value::String(config.audience.clone())),
            exp: now + config.jwt_expiration_secs,
            nbf: None,
            iat: Some(now),
            username: None,
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Identity carried by these claims, if a subject is present.
    pub fn into_identity(self) -> ApiResult<Identity> {
        let user_id = self
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Token has no subject"))?;
        let mut identity = Identity::new(user_id).with_scopes(self.scopes);
        identity.display_name = self.username;
        Ok(identity)
    }
}

// ============================================================================
// VERIFICATION
// ============================================================================

fn validate_claim_times(now: i64, exp: i64, nbf: Option<i64>, leeway_secs: i64) -> ApiResult<()> {
    if let Some(nbf) = nbf {
        if now + leeway_secs < nbf {
            return Err(ApiError::unauthorized("Token not yet valid"));
        }
    }
    if exp < now - leeway_secs {
        return Err(ApiError::unauthorized("Token has expired"));
    }
    Ok(())
}

/// Check signature, audience and validity window, returning the claims.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.set_audience(&[config.audience.as_str()]);
    validation.required_spec_claims =
        std::collections::HashSet::from(["exp".to_string(), "aud".to_string()]);

    let token_data =
        decode::<Claims>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::unauthorized("Token signature is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                ApiError::unauthorized("Token audience mismatch")
            }
            jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(claim) => {
                ApiError::unauthorized(format!("Token is missing the '{}' claim", claim))
            }
            _ => ApiError::unauthorized("Token is invalid"),
        })?;

    let claims = token_data.claims;
    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(timestamp = now, "System clock returned pre-epoch time");
        return Err(ApiError::internal_error("Server time configuration error"));
    }
    validate_claim_times(now, claims.exp, claims.nbf, config.jwt_leeway_secs)?;

    Ok(claims)
}

/// Authenticate an `Authorization` header value.
pub fn authenticate_bearer(config: &AuthConfig, auth_header: Option<&str>) -> ApiResult<Identity> {
    let value = auth_header
        .ok_or_else(|| ApiError::unauthorized("Authentication required: provide a bearer token"))?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Authorization header must use Bearer scheme"))?;
    validate_jwt_token(config, token)?.into_identity()
}

/// Mint a token for `claims`.
pub fn generate_jwt_token(config: &AuthConfig, claims: &Claims) -> ApiResult<String> {
    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    encode(&Header::new(config.jwt_algorithm), claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const SECRET: &str = "test-secret-that-is-long-enough-for-production-use";

    fn config() -> AuthConfig {
        AuthConfig::default()
            .with_secret(SECRET)
            .with_clock(Arc::new(test_clocks::valid()))
    }

    fn token_for(claims: &Claims) -> String {
        generate_jwt_token(&config(), claims).unwrap()
    }

    #[test]
    fn test_valid_token_yields_identity() {
        let cfg = config();
        let claims = Claims::new("user-1", &cfg)
            .with_username("ada")
            .with_scopes(["spec:write"]);
        let header = format!("Bearer {}", token_for(&claims));

        let identity = authenticate_bearer(&cfg, Some(&header)).unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.display_name.as_deref(), Some("ada"));
        assert!(identity.has_scope("spec:write"));
    }

    #[test]
    fn test_missing_header_and_wrong_scheme() {
        let cfg = config();
        let err = authenticate_bearer(&cfg, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        let err = authenticate_bearer(&cfg, Some("Basic dXNlcjpwYXNz")).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[test]
    fn test_bad_signature() {
        let cfg = config();
        let claims = Claims::new("user-1", &cfg);
        let other = config().with_secret("a-completely-different-secret-value-here");
        let token = generate_jwt_token(&other, &claims).unwrap();
        let err = validate_jwt_token(&cfg, &token).unwrap_err();
        assert!(err.message.contains("signature"));
    }

    #[test]
    fn test_audience_mismatch() {
        let cfg = config();
        let mut claims = Claims::new("user-1", &cfg);
        claims.aud = Some(serde_json::json!("some-other-service"));
        let err = validate_jwt_token(&cfg, &token_for(&claims)).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert!(err.message.contains("audience"));
    }

    #[test]
    fn test_missing_subject() {
        let cfg = config();
        let mut claims = Claims::new("user-1", &cfg);
        claims.sub = None;
        let header = format!("Bearer {}", token_for(&claims));
        let err = authenticate_bearer(&cfg, Some(&header)).unwrap_err();
        assert!(err.message.contains("subject"));
    }

    #[test]
    fn test_expired_token() {
        let cfg = config();
        let claims = Claims::new("user-1", &cfg);
        let later = config().with_clock(Arc::new(test_clocks::future()));
        let err = validate_jwt_token(&later, &token_for(&claims)).unwrap_err();
        assert!(err.message.contains("expired"));
    }

    #[test]
    fn test_leeway_accepts_slightly_expired() {
        let cfg = config();
        let claims = Claims::new("user-1", &cfg);
        let skewed = config().with_clock(Arc::new(FixedClock(
            test_clocks::valid().0 + cfg.jwt_expiration_secs + 30,
        )));
        assert!(validate_jwt_token(&skewed, &token_for(&claims)).is_ok());
    }

    #[test]
    fn test_not_before_in_future() {
        let cfg = config();
        let mut claims = Claims::new("user-1", &cfg);
        claims.nbf = Some(test_clocks::valid().0 + 600);
        let err = validate_jwt_token(&cfg, &token_for(&claims)).unwrap_err();
        assert!(err.message.contains("not yet valid"));
    }

    #[test]
    fn test_pre_epoch_clock_is_internal_error() {
        let cfg = config();
        let claims = Claims::new("user-1", &cfg);
        let broken = config().with_clock(Arc::new(FixedClock(-5)));
        let err = validate_jwt_token(&broken, &token_for(&claims)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = JwtSecret::new(SECRET);
        let debug = format!("{:?}", secret);
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_production_validation() {
        let insecure = AuthConfig {
            jwt_secret: JwtSecret::new(""),
            ..config()
        };
        assert!(insecure.validate_for_production(true).is_err());
        assert!(insecure.validate_for_production(false).is_ok());

        let short = config().with_secret("short");
        assert!(short.validate_for_production(true).is_err());

        assert!(config().validate_for_production(true).is_ok());

        let asymmetric = AuthConfig {
            jwt_algorithm: Algorithm::RS256,
            ..config()
        };
        assert!(asymmetric.validate_for_production(false).is_err());
    }
}
