use diesel::prelude::*;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::{json, Json, Value};
use rocket::State;
use serde::Deserialize;

use crate::config::Settings;
use crate::db::schema::users;
use crate::db::Db;
use crate::mail::{self, SharedMailer};
use crate::tokens::{Purpose, TokenError, TokenService};
use crate::types::{ApiError, ApiResult, Validate, ValidationError};

pub mod auth;
pub mod models;
pub mod social;
mod utils;

use self::auth::AuthFailure;
use self::models::{DecoyHash, NewUser, User};
use self::utils::*;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistrationDetails {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Registration {
    user: RegistrationDetails,
}

impl Validate for Registration {
    fn validate(mut self) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::default();
        self.user.email = normalize_email(&self.user.email);
        self.user.username = self.user.username.trim().to_string();

        if let Err(e) = validate_email_re(&self.user.email) {
            errors.merge(e);
        }
        if let Err(e) = validate_username_re(&self.user.username) {
            errors.merge(e);
        }
        if let Err(e) = validate_password(&self.user.password) {
            errors.merge(e);
        }
        errors.into_result(self)
    }
}

#[post("/", format = "json", data = "<registration>")]
pub async fn register(
    db: Db,
    settings: &State<Settings>,
    tokens: &State<TokenService>,
    mailer: &State<SharedMailer>,
    registration: Json<Registration>,
) -> Result<Custom<Json<Value>>, ApiError> {
    let details = registration.validate()?.into_inner().user;
    let cost = settings.bcrypt_cost;

    let user = db
        .run(move |conn| {
            validate_available(Some(&details.email), Some(&details.username), None, conn)??;
            let password_hash = User::make_password(&details.password, cost)?;
            let user = diesel::insert_into(users::table)
                .values(&NewUser {
                    username: &details.username,
                    email: &details.email,
                    password_hash: &password_hash,
                    is_verified: false,
                })
                .get_result::<User>(conn)?;
            Ok(user)
        })
        .await?;

    let token = tokens.issue(user.id, Purpose::EmailVerify, settings.verification_ttl)?;
    let email = mail::verification_email(&settings.domain, &user.email, &user.username, &token);
    if let Err(e) = mailer.send(email).await {
        tracing::warn!(user_id = user.id, error = %e, "verification email failed; rolling back registration");
        let user_id = user.id;
        db.run(move |conn| {
            diesel::delete(users::table.find(user_id)).execute(conn)?;
            Ok(())
        })
        .await?;
        return Err(e.into());
    }

    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok(Custom(
        Status::Created,
        Json(json!({
            "message": format!("A verification link has been sent to {}", user.email),
            "user": { "email": user.email, "username": user.username },
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct LoginDetails {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    user: LoginDetails,
}

/// An unknown email costs the same bcrypt work as a wrong password.
#[post("/login", format = "json", data = "<login>")]
pub async fn login(
    db: Db,
    settings: &State<Settings>,
    tokens: &State<TokenService>,
    decoy: &State<DecoyHash>,
    login: Json<Login>,
) -> ApiResult<Value> {
    let login = login.into_inner().user;
    let email = normalize_email(&login.email);
    let decoy = decoy.inner().clone();

    let user = db
        .run(move |conn| match User::find_by_email(&email, conn)? {
            Some(user) if user.verify_password(&login.password) => Ok(Some(user)),
            Some(_) => Ok(None),
            None => {
                decoy.burn(&login.password);
                Ok(None)
            }
        })
        .await?
        .ok_or_else(|| ApiError::unauthorized("A user with this email and password was not found."))?;
    if !user.is_verified {
        return Err(ApiError::unauthorized(
            "This account has not been verified. Check your email for the verification link.",
        ));
    }

    let token = user.token(tokens, settings.session_ttl)?;
    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(json!({
        "user": { "email": user.email, "username": user.username, "token": token }
    })))
}

/// Consumes an email-verification link. A link for an already verified
/// account fails without changing anything.
#[get("/verify/<token>")]
pub async fn verify_email(db: Db, tokens: &State<TokenService>, token: &str) -> ApiResult<Value> {
    let user_id = tokens.verify_for(token, Purpose::EmailVerify)?;
    db.run(move |conn| {
        let user = User::find(user_id, conn)?
            .ok_or_else(|| ApiError::not_found("No user with this email has been registered"))?;
        let unverified = users::table
            .filter(users::id.eq(user.id))
            .filter(users::is_verified.eq(false));
        let updated = diesel::update(unverified)
            .set(users::is_verified.eq(true))
            .execute(conn)?;
        if updated == 0 {
            return Err(ValidationError::from("email", "This email has already been verified").into());
        }
        Ok(())
    })
    .await?;

    tracing::info!(user_id, "email verified");
    Ok(Json(json!({ "success": "Your email has been verified" })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetRequest {
    email: String,
}

#[post("/password_reset", format = "json", data = "<request>")]
pub async fn request_password_reset(
    db: Db,
    settings: &State<Settings>,
    tokens: &State<TokenService>,
    mailer: &State<SharedMailer>,
    request: Json<PasswordResetRequest>,
) -> Result<Custom<Json<Value>>, ApiError> {
    let email = normalize_email(&request.email);
    let user = db
        .run(move |conn| {
            User::find_by_email(&email, conn)?
                .ok_or_else(|| ApiError::not_found("No user with this email has been registered"))
        })
        .await?;

    let token = tokens.issue_stamped(
        user.id,
        Purpose::PasswordReset,
        settings.reset_ttl,
        Some(user.reset_stamp()),
    )?;
    mailer
        .send(mail::password_reset_email(&settings.domain, &user.email, &token))
        .await?;

    tracing::info!(user_id = user.id, "password reset requested");
    Ok(Custom(
        Status::Accepted,
        Json(json!({ "message": format!("A password reset link has been sent to {}", user.email) })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPassword {
    password: String,
}

impl Validate for NewPassword {
    fn validate(self) -> Result<Self, ValidationError> {
        validate_password(&self.password)?;
        Ok(self)
    }
}

/// The stored hash must still be the one the link was stamped with, both
/// when the link is checked and when the new hash is written.
#[put("/password_reset/<token>", format = "json", data = "<update>")]
pub async fn set_password(
    db: Db,
    settings: &State<Settings>,
    tokens: &State<TokenService>,
    token: &str,
    update: Json<NewPassword>,
) -> Result<Custom<Json<Value>>, ApiError> {
    let claims = tokens.verify_claims_for(token, Purpose::PasswordReset)?;
    let update = update.into_inner();
    let cost = settings.bcrypt_cost;

    let user_id = db
        .run(move |conn| {
            let user = User::find(claims.subject()?, conn)?.ok_or(AuthFailure::UnknownSubject)?;
            if claims.stamp.as_deref() != Some(user.reset_stamp().as_str()) {
                return Err(TokenError::Consumed.into());
            }

            let update = update.validate()?;
            let password_hash = User::make_password(&update.password, cost)?;
            let unchanged = users::table
                .filter(users::id.eq(user.id))
                .filter(users::password_hash.eq(&user.password_hash));
            let updated = diesel::update(unchanged)
                .set(users::password_hash.eq(&password_hash))
                .execute(conn)?;
            if updated == 0 {
                return Err(TokenError::Consumed.into());
            }
            Ok(user.id)
        })
        .await?;

    tracing::info!(user_id, "password reset");
    Ok(Custom(
        Status::Accepted,
        Json(json!({ "message": "Your password has been reset. You can now log in." })),
    ))
}

#[get("/user")]
pub fn current(user: User) -> ApiResult<Value> {
    Ok(Json(json!({ "user": user })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Validate for UpdateUser {
    fn validate(mut self) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::default();
        if let Some(username) = self.username.as_mut() {
            *username = username.trim().to_string();
            if let Err(e) = validate_username_re(username) {
                errors.merge(e);
            }
        }
        if let Some(password) = &self.password {
            if let Err(e) = validate_password(password) {
                errors.merge(e);
            }
        }
        errors.into_result(self)
    }
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UpdateUser,
}

#[put("/user", format = "json", data = "<update>")]
pub async fn update(mut user: User, db: Db, settings: &State<Settings>, update: Json<Update>) -> ApiResult<Value> {
    let update = update.into_inner().user.validate()?;
    let cost = settings.bcrypt_cost;

    let user = db
        .run(move |conn| {
            if let Some(new_username) = update.username {
                validate_available(None, Some(&new_username), Some(user.id), conn)??;
                user.username = new_username;
            }
            if let Some(new_password) = update.password {
                user.new_password(&new_password, cost)?;
            }
            diesel::update(&user).set(&user).execute(conn)?;
            Ok(user)
        })
        .await?;

    tracing::info!(user_id = user.id, "user updated");
    Ok(Json(json!({ "user": user })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(username: &str, email: &str, password: &str) -> Registration {
        Registration {
            user: RegistrationDetails {
                username: username.into(),
                email: email.into(),
                password: password.into(),
            },
        }
    }

    #[test]
    fn registration_normalizes_email() {
        let valid = registration(" alice ", " Alice@Example.COM", "test1234").validate().unwrap();
        assert_eq!(valid.user.email, "alice@example.com");
        assert_eq!(valid.user.username, "alice");
    }

    #[test]
    fn registration_collects_every_field_error() {
        let err = registration("a", "nope", "short").validate().unwrap_err();
        assert!(!err.messages("email").is_empty());
        assert!(!err.messages("username").is_empty());
        assert!(!err.messages("password").is_empty());
    }

    #[test]
    fn registration_rejects_unknown_fields() {
        let body = r#"{"user": {"username": "a", "email": "b", "password": "c", "is_verified": true}}"#;
        assert!(serde_json::from_str::<Registration>(body).is_err());
    }

    #[test]
    fn partial_user_update_checks_only_supplied_fields() {
        assert!(UpdateUser::default().validate().is_ok());
        let err = UpdateUser {
            username: None,
            password: Some("abc".into()),
        }
        .validate()
        .unwrap_err();
        assert!(err.messages("username").is_empty());
        assert!(!err.messages("password").is_empty());
    }
}
