//! HTTP Basic authentication for the admin and sales areas.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde_json::json;
use std::marker::PhantomData;
use thiserror::Error;

use common::{AuthConfig, CredentialConfig};

use super::AppState;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Access not configured")]
    NotConfigured,
    #[error("Authentication required")]
    Missing,
    #[error("Invalid authorization header")]
    Malformed,
    #[error("Invalid credentials")]
    Invalid,
}

/// A protected area with its own credentials.
pub trait Realm: Send + Sync + 'static {
    const NAME: &'static str;

    fn credentials(auth: &AuthConfig) -> Option<&CredentialConfig>;
}

pub struct AdminArea;
pub struct SalesArea;

impl Realm for AdminArea {
    const NAME: &'static str = "Admin Area";

    fn credentials(auth: &AuthConfig) -> Option<&CredentialConfig> {
        auth.admin.as_ref()
    }
}

impl Realm for SalesArea {
    const NAME: &'static str = "Sales Area";

    fn credentials(auth: &AuthConfig) -> Option<&CredentialConfig> {
        auth.sales.as_ref()
    }
}

/// Request guard: the request carried valid Basic credentials for realm `R`.
pub struct BasicAuth<R: Realm> {
    pub username: String,
    _realm: PhantomData<R>,
}

pub type AdminUser = BasicAuth<AdminArea>;
pub type SalesUser = BasicAuth<SalesArea>;

/// Why the last guard in this request refused, read back by the 401 catcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthRejection(pub Option<(&'static str, AuthError)>);

fn decode_basic(header: &str) -> Result<(String, String), AuthError> {
    let (scheme, encoded) = header.trim().split_once(' ').ok_or(AuthError::Missing)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::Missing);
    }
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| AuthError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
    let (user, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;
    Ok((user.to_string(), password.to_string()))
}

/// Check an `Authorization` header against configured credentials.
pub fn check_basic(creds: Option<&CredentialConfig>, header: Option<&str>) -> Result<String, AuthError> {
    let creds = creds
        .filter(|c| !c.username.is_empty() && !c.password_hash.is_empty())
        .ok_or(AuthError::NotConfigured)?;
    let (user, password) = decode_basic(header.ok_or(AuthError::Missing)?)?;
    if user != creds.username {
        return Err(AuthError::Invalid);
    }
    let parsed = PasswordHash::new(&creds.password_hash).map_err(|e| {
        tracing::error!("auth: stored password hash is not a valid PHC string: {}", e);
        AuthError::NotConfigured
    })?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::Invalid)?;
    Ok(user)
}

#[rocket::async_trait]
impl<'r, R: Realm> FromRequest<'r> for BasicAuth<R> {
    type Error = AuthError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let creds = req
            .rocket()
            .state::<AppState>()
            .and_then(|state| R::credentials(&state.config.auth));
        match check_basic(creds, req.headers().get_one("Authorization")) {
            Ok(username) => Outcome::Success(BasicAuth {
                username,
                _realm: PhantomData,
            }),
            Err(e) => {
                tracing::warn!(realm = R::NAME, path = %req.uri().path(), "auth: {}", e);
                req.local_cache(|| AuthRejection(Some((R::NAME, e))));
                Outcome::Error((Status::Unauthorized, e))
            }
        }
    }
}

/// 401 body, with the Basic challenge unless the realm has no credentials.
pub struct AuthChallenge {
    pub realm: &'static str,
    pub error: AuthError,
}

impl AuthChallenge {
    /// Rebuild the refusal for a request, falling back on the path's realm.
    pub fn for_request(req: &Request<'_>) -> Self {
        let AuthRejection(cached) = *req.local_cache(AuthRejection::default);
        let (realm, error) = cached.unwrap_or_else(|| {
            let realm = if req.uri().path().starts_with("/api/sales") {
                SalesArea::NAME
            } else {
                AdminArea::NAME
            };
            (realm, AuthError::Missing)
        });
        Self { realm, error }
    }
}

impl<'r> Responder<'r, 'static> for AuthChallenge {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let body = json!({ "success": false, "error": self.error.to_string() });
        let mut res = Response::build_from(Json(body).respond_to(req)?);
        res.status(Status::Unauthorized).raw_header("Cache-Control", "no-store");
        if self.error != AuthError::NotConfigured {
            res.raw_header("WWW-Authenticate", format!("Basic realm=\"{}\"", self.realm));
        }
        res.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use rand::rngs::OsRng;

    fn creds(password: &str) -> CredentialConfig {
        let salt = SaltString::generate(&mut OsRng);
        CredentialConfig {
            username: "admin".into(),
            password_hash: Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .unwrap()
                .to_string(),
        }
    }

    fn header(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
    }

    #[test]
    fn basic_credentials_are_verified() {
        let c = creds("s3cret");
        assert_eq!(check_basic(Some(&c), Some(&header("admin", "s3cret"))).unwrap(), "admin");
        assert_eq!(check_basic(Some(&c), Some(&header("admin", "nope"))), Err(AuthError::Invalid));
        assert_eq!(check_basic(Some(&c), Some(&header("root", "s3cret"))), Err(AuthError::Invalid));
    }

    #[test]
    fn header_problems() {
        let c = creds("pw");
        assert_eq!(check_basic(None, Some(&header("admin", "pw"))), Err(AuthError::NotConfigured));
        assert_eq!(check_basic(Some(&c), None), Err(AuthError::Missing));
        assert_eq!(check_basic(Some(&c), Some("Bearer abc")), Err(AuthError::Missing));
        assert_eq!(check_basic(Some(&c), Some("Basic !!!")), Err(AuthError::Malformed));
        let no_colon = format!("Basic {}", STANDARD.encode("adminpw"));
        assert_eq!(check_basic(Some(&c), Some(&no_colon)), Err(AuthError::Malformed));
    }
}
