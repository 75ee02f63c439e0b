use crate::config::HttpServerConfig;
use crate::models::Caller;
use axum::http::HeaderMap;

/// Caller id used when a request carries no identifying header
pub const ANONYMOUS: &str = "anonymous";

/// Why a request could not be attributed to a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Malformed,
    InvalidKey,
}

impl AuthFailure {
    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::Missing => "Missing Authorization header",
            AuthFailure::Malformed => "Use 'Authorization: Bearer <api-key>' header",
            AuthFailure::InvalidKey => "Invalid API key",
        }
    }
}

/// Turns request headers into a verified caller
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, headers: &HeaderMap) -> std::result::Result<Caller, AuthFailure>;
}

/// Bearer-key verification with one key per trust level.
///
/// Without a configured user key, unauthenticated requests are accepted as
/// end users (public chat widget). Operators always need their key.
#[derive(Clone)]
pub struct ApiKeyVerifier {
    operator_key: Option<String>,
    user_key: Option<String>,
}

impl ApiKeyVerifier {
    pub fn new(operator_key: Option<String>, user_key: Option<String>) -> Self {
        Self {
            operator_key: operator_key.filter(|k| !k.is_empty()),
            user_key: user_key.filter(|k| !k.is_empty()),
        }
    }

    /// Read both keys from the environment variables named in `[http_server]`
    pub fn from_config(config: &HttpServerConfig) -> Self {
        let operator_key = std::env::var(&config.operator_key_env).ok();
        if operator_key.is_none() {
            log::warn!(
                "{} not set; knowledge administration endpoints will reject every request",
                config.operator_key_env
            );
        }
        Self::new(operator_key, std::env::var(&config.user_key_env).ok())
    }
}

impl IdentityVerifier for ApiKeyVerifier {
    fn verify(&self, headers: &HeaderMap) -> std::result::Result<Caller, AuthFailure> {
        let caller_id = caller_id(headers);

        let header = match headers.get("authorization").and_then(|h| h.to_str().ok()) {
            Some(h) => h,
            None if self.user_key.is_none() => return Ok(Caller::end_user(caller_id)),
            None => return Err(AuthFailure::Missing),
        };

        let provided = header.strip_prefix("Bearer ").ok_or(AuthFailure::Malformed)?;

        if self.operator_key.as_deref() == Some(provided) {
            Ok(Caller::operator(caller_id))
        } else if self.user_key.is_none() || self.user_key.as_deref() == Some(provided) {
            Ok(Caller::end_user(caller_id))
        } else {
            Err(AuthFailure::InvalidKey)
        }
    }
}

/// `x-caller-id`, else the first `x-forwarded-for` hop, else anonymous
pub fn caller_id(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(id) = header("x-caller-id") {
        return id.to_string();
    }
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}
