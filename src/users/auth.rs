//! Bearer-token authentication.
//!
//! `RequestContext` resolves the caller for every route that declares it: no
//! `Authorization` header means an anonymous caller, anything else must be a
//! valid session token for an existing user. A bad credential fails the
//! request with 401 before the handler runs; the reason is kept in the
//! request-local cache so the 401 catcher can report it.

use rocket::request::{self, FromRequest, Outcome, Request};

use super::models::User;
use crate::db::{self, Pool};
use crate::tokens::{Purpose, TokenError, TokenService};
use crate::types::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("Authentication credentials were not provided")]
    MissingCredentials,
    #[error("Authorization header must be of the form 'Bearer <token>'")]
    BadScheme,
    #[error("{0}")]
    Token(#[from] TokenError),
    #[error("User for this token no longer exists")]
    UnknownSubject,
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> ApiError {
        ApiError::Unauthorized(failure.to_string())
    }
}

/// Why the guard rejected the request, if it did.
#[derive(Debug, Default)]
pub struct Rejection(pub Option<String>);

/// Identity of the caller, as resolved from the request headers.
#[derive(Debug)]
pub struct RequestContext {
    pub user: Option<User>,
}

impl RequestContext {
    pub fn user_id(&self) -> Option<i32> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// Returns the token from an `Authorization` header value. The scheme is
/// matched case-insensitively.
pub fn bearer_token(header: &str) -> Result<&str, AuthFailure> {
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or("");
    let token = parts.next().map(str::trim).unwrap_or("");
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthFailure::BadScheme);
    }
    Ok(token)
}

async fn resolve(request: &Request<'_>) -> Result<Option<User>, ApiError> {
    let header = match request.headers().get_one("Authorization") {
        Some(header) => header,
        None => return Ok(None),
    };
    let token = bearer_token(header)?;

    let tokens = request.rocket().state::<TokenService>().ok_or(ApiError::Internal)?;
    let user_id = tokens
        .verify_for(token, Purpose::Session)
        .map_err(AuthFailure::from)?;

    let pool = request.rocket().state::<Pool>().ok_or(ApiError::Internal)?;
    let user = db::run(pool, move |conn| Ok(User::find(user_id, conn)?)).await?;
    Ok(Some(user.ok_or(AuthFailure::UnknownSubject)?))
}

fn reject<S>(request: &Request<'_>, error: ApiError) -> request::Outcome<S, ApiError> {
    let status = error.status();
    if let ApiError::Unauthorized(message) = &error {
        tracing::debug!(reason = %message, "request rejected");
        request.local_cache(|| Rejection(Some(message.clone())));
    }
    Outcome::Error((status, error))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestContext {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match resolve(request).await {
            Ok(user) => Outcome::Success(RequestContext { user }),
            Err(error) => reject(request, error),
        }
    }
}

/// An authenticated caller. Anonymous requests are rejected with 401.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match request.guard::<RequestContext>().await {
            Outcome::Success(RequestContext { user: Some(user) }) => Outcome::Success(user),
            Outcome::Success(RequestContext { user: None }) => {
                reject(request, AuthFailure::MissingCredentials.into())
            }
            Outcome::Error(error) => Outcome::Error(error),
            Outcome::Forward(status) => Outcome::Forward(status),
        }
    }
}

/// A resource with a single owning user.
pub trait Owned {
    fn owner_id(&self) -> i32;
}

/// Fails with 403 unless `user` owns `resource`.
pub fn ensure_owner<T: Owned>(resource: &T, user: &User, message: &str) -> Result<(), ApiError> {
    if resource.owner_id() == user.id {
        Ok(())
    } else {
        tracing::info!(user_id = user.id, owner_id = resource.owner_id(), "ownership check failed");
        Err(ApiError::forbidden(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rocket::http::Status;

    struct Note {
        author: i32,
    }

    impl Owned for Note {
        fn owner_id(&self) -> i32 {
            self.author
        }
    }

    fn user(id: i32) -> User {
        User {
            id,
            username: format!("user{}", id),
            email: format!("user{}@example.com", id),
            password_hash: String::new(),
            is_verified: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn bearer_scheme_is_required() {
        assert_eq!(bearer_token("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token("bearer   abc").unwrap(), "abc");
        assert!(matches!(bearer_token("Token abc"), Err(AuthFailure::BadScheme)));
        assert!(matches!(bearer_token("Bearer"), Err(AuthFailure::BadScheme)));
        assert!(matches!(bearer_token("abc"), Err(AuthFailure::BadScheme)));
    }

    #[test]
    fn owner_passes_and_others_are_forbidden() {
        let note = Note { author: 1 };
        assert!(ensure_owner(&note, &user(1), "nope").is_ok());
        for other in [2, 3, 100] {
            match ensure_owner(&note, &user(other), "Only the owner can edit this note.") {
                Err(ApiError::Forbidden(message)) => {
                    assert_eq!(message, "Only the owner can edit this note.")
                }
                other => panic!("expected forbidden, got {:?}", other),
            }
        }
    }

    #[test]
    fn failures_become_unauthorized() {
        let err = ApiError::from(AuthFailure::Token(TokenError::Expired));
        assert_eq!(err.status(), Status::Unauthorized);
        let err = ApiError::from(AuthFailure::UnknownSubject);
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "User for this token no longer exists"));
    }
}
