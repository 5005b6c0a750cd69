use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rocket::data::{Data, Limits, ToByteUnit};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::{json, Json, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::{ARTICLES_SLUG_KEY, PROFILES_USER_ID_KEY, USERS_EMAIL_KEY, USERS_USERNAME_KEY};
use crate::media::UploadError;
use crate::tokens::TokenError;
use crate::upstream::UpstreamError;
use crate::utils::try_respond;

/// Static schema check for a request payload.
pub trait Validate
where
    Self: Sized,
{
    fn validate(self) -> Result<Self, ValidationError>;
}

#[derive(Debug)]
pub enum ApiError {
    Diesel(DieselError),
    Validation(ValidationError),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Upstream(UpstreamError),
    Upload(UploadError),
    Unavailable,
    Internal,
}

impl ApiError {
    pub fn unauthorized<S: Into<String>>(message: S) -> ApiError {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden<S: Into<String>>(message: S) -> ApiError {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> ApiError {
        ApiError::NotFound(message.into())
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::Diesel(DieselError::NotFound) => Status::NotFound,
            ApiError::Diesel(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Status::BadRequest
            }
            ApiError::Diesel(_) | ApiError::Internal => Status::InternalServerError,
            ApiError::Validation(_) | ApiError::Upstream(_) | ApiError::Upload(_) => Status::BadRequest,
            ApiError::Unauthorized(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Unavailable => Status::ServiceUnavailable,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            ApiError::Diesel(DieselError::NotFound) => {
                json!({ "message": "The requested resource does not exist" })
            }
            ApiError::Diesel(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
                let field = info
                    .column_name()
                    .unwrap_or_else(|| conflicting_field(info.constraint_name()));
                json!({ "errors": { field: ["This value is already taken"] } })
            }
            ApiError::Validation(error) => json!({ "errors": error }),
            ApiError::Unauthorized(message)
            | ApiError::Forbidden(message)
            | ApiError::NotFound(message) => json!({ "message": message }),
            ApiError::Upstream(error) => json!({
                "errors": error.to_string(),
                "retryable": error.retryable(),
            }),
            ApiError::Upload(error) => json!({
                "errors": error.to_string(),
                "retryable": error.retryable(),
            }),
            ApiError::Unavailable => json!({ "message": "Service temporarily unavailable" }),
            ApiError::Diesel(_) | ApiError::Internal => json!({ "message": "Internal server error" }),
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        ApiError::Diesel(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> ApiError {
        ApiError::Validation(err)
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> ApiError {
        ApiError::Upstream(err)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> ApiError {
        ApiError::Upload(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> ApiError {
        match err {
            TokenError::Signing(_) => ApiError::Internal,
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> ApiError {
        tracing::error!(error = %err, "password hashing failed");
        ApiError::Internal
    }
}

/// Field named in the error body when a write hits the unique
/// constraint `constraint`.
pub fn conflicting_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some(USERS_EMAIL_KEY) => "email",
        Some(USERS_USERNAME_KEY) => "username",
        Some(ARTICLES_SLUG_KEY) => "slug",
        Some(PROFILES_USER_ID_KEY) => "profile",
        _ => "error",
    }
}

pub fn parse_payload<T: DeserializeOwned>(body: &str) -> Result<T, ValidationError> {
    serde_json::from_str(body).map_err(|e| ValidationError::from("body", e.to_string()))
}

/// Reads a JSON body that the route accepted as raw `Data`, so handlers can
/// authorize the caller before looking at the payload. The body is capped at
/// the `json` limit.
pub async fn read_payload<T: DeserializeOwned>(data: Data<'_>, limits: &Limits) -> Result<T, ValidationError> {
    let limit = limits.get("json").unwrap_or_else(|| 1.mebibytes());
    let body = data
        .open(limit)
        .into_string()
        .await
        .map_err(|e| ValidationError::from("body", e.to_string()))?;
    if !body.is_complete() {
        return Err(ValidationError::from(
            "body",
            format!("Request body may not exceed {}", limit),
        ));
    }
    parse_payload(&body)
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Default, PartialEq)]
pub struct ValidationError(BTreeMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }

    pub fn messages(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationError> {
        if self.empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        match &self {
            ApiError::Diesel(DieselError::NotFound) | ApiError::Diesel(DieselError::DatabaseError(..)) => {
                tracing::debug!(error = ?self, "database error")
            }
            ApiError::Diesel(error) => tracing::error!(%error, "database error"),
            ApiError::Upstream(error) => tracing::warn!(%error, "upstream failure"),
            ApiError::Internal => tracing::error!("internal error"),
            _ => {}
        }
        try_respond(req, &self.body(), status)
    }
}

impl<T> Validate for Json<T>
where
    T: Validate,
{
    fn validate(self) -> Result<Self, ValidationError> {
        let inner = self.into_inner();
        let validated = inner.validate()?;
        Ok(Json(validated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::DatabaseErrorInformation;

    #[test]
    fn validation_errors_merge_per_field() {
        let mut errors = ValidationError::from("email", "Invalid email");
        let mut other = ValidationError::from("email", "Email already exists");
        other.add_error("password", "Password too short");
        errors.merge(other);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.messages("email").len(), 2);
        assert_eq!(errors.messages("password").to_vec(), vec!["Password too short".to_string()]);
        assert!(errors.messages("username").is_empty());
    }

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(ApiError::from(ValidationError::from("a", "b")).status(), Status::BadRequest);
        assert_eq!(ApiError::unauthorized("no").status(), Status::Unauthorized);
        assert_eq!(ApiError::forbidden("no").status(), Status::Forbidden);
        assert_eq!(ApiError::not_found("no").status(), Status::NotFound);
        assert_eq!(ApiError::from(DieselError::NotFound).status(), Status::NotFound);
        assert_eq!(ApiError::Unavailable.status(), Status::ServiceUnavailable);
        let upstream = UpstreamError::NotConfigured { service: "image host" };
        assert_eq!(ApiError::from(upstream).status(), Status::BadRequest);
    }

    #[test]
    fn token_failures_are_unauthorized() {
        let err = ApiError::from(TokenError::Expired);
        assert_eq!(err.status(), Status::Unauthorized);
        assert_eq!(err.body(), json!({ "message": "Token has expired" }));
    }

    #[test]
    fn validation_body_lists_fields() {
        let body = ApiError::from(ValidationError::from("title", "Title may not be blank")).body();
        assert_eq!(body, json!({ "errors": { "title": ["Title may not be blank"] } }));
    }

    #[test]
    fn payload_errors_are_validation_errors() {
        #[derive(Debug, serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Body {
            #[allow(dead_code)]
            title: Option<String>,
        }
        assert!(parse_payload::<Body>(r#"{ "title": "x" }"#).is_ok());
        let err = parse_payload::<Body>(r#"{ "slug": "x" }"#).unwrap_err();
        assert_eq!(err.messages("body").len(), 1);
        let err = parse_payload::<Body>("{not json").unwrap_err();
        assert_eq!(err.messages("body").len(), 1);
    }

    struct Violation(Option<&'static str>);

    impl DatabaseErrorInformation for Violation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            None
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            self.0
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    fn unique_violation(constraint: Option<&'static str>) -> ApiError {
        ApiError::from(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(Violation(constraint)),
        ))
    }

    #[test]
    fn unique_violations_name_the_field() {
        let err = unique_violation(Some(USERS_USERNAME_KEY));
        assert_eq!(err.status(), Status::BadRequest);
        assert_eq!(err.body(), json!({ "errors": { "username": ["This value is already taken"] } }));
        assert_eq!(
            unique_violation(Some(ARTICLES_SLUG_KEY)).body(),
            json!({ "errors": { "slug": ["This value is already taken"] } })
        );
        assert_eq!(
            unique_violation(None).body(),
            json!({ "errors": { "error": ["This value is already taken"] } })
        );
    }

    #[test]
    fn into_result_passes_value_through_when_clean() {
        assert_eq!(ValidationError::default().into_result(5), Ok(5));
        assert!(ValidationError::from("x", "y").into_result(5).is_err());
    }
}
