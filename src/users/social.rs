//! Federated login with Google, Facebook and Twitter access tokens.
//!
//! The provider vouches for an email address; the local account with that
//! email is used, or created verified, and a local session token is returned.

use diesel::prelude::*;
use rocket::request::FromParam;
use rocket::serde::json::{json, Json, Value};
use rocket::State;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::models::{NewUser, User, UNUSABLE_PASSWORD};
use super::utils::normalize_email;
use crate::config::Settings;
use crate::db::schema::users;
use crate::db::{self, Db, USERS_USERNAME_KEY};
use crate::tokens::TokenService;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};
use crate::upstream::{self, UpstreamError};
use crate::utils::unique_candidate;

const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const FACEBOOK_ME_URL: &str = "https://graph.facebook.com/me";
const TWITTER_ME_URL: &str = "https://api.twitter.com/2/users/me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Facebook,
    Twitter,
}

impl Provider {
    pub fn service(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
            Provider::Twitter => "twitter",
        }
    }
}

impl<'a> FromParam<'a> for Provider {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        match param {
            "google" => Ok(Provider::Google),
            "facebook" => Ok(Provider::Facebook),
            "twitter" => Ok(Provider::Twitter),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    pub email: String,
    pub name: Option<String>,
}

#[rocket::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, provider: Provider, access_token: &str) -> Result<FederatedIdentity, UpstreamError>;
}

pub type SharedIdentityProvider = Arc<dyn IdentityProvider>;

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpIdentityProvider {
    pub fn new(settings: &Settings) -> reqwest::Result<HttpIdentityProvider> {
        Ok(HttpIdentityProvider {
            client: upstream::client(settings.upstream_timeout)?,
            timeout: settings.upstream_timeout,
        })
    }
}

#[rocket::async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn identify(&self, provider: Provider, access_token: &str) -> Result<FederatedIdentity, UpstreamError> {
        let request = match provider {
            Provider::Google => self.client.get(GOOGLE_USERINFO_URL).bearer_auth(access_token),
            Provider::Facebook => self
                .client
                .get(FACEBOOK_ME_URL)
                .query(&[("fields", "id,name,email"), ("access_token", access_token)]),
            Provider::Twitter => self
                .client
                .get(TWITTER_ME_URL)
                .query(&[("user.fields", "name,username,confirmed_email")])
                .bearer_auth(access_token),
        };
        let service = provider.service();
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(service, self.timeout, e))?;
        let response = upstream::check(service, response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(service, self.timeout, e))?;
        parse_identity(provider, &body)
    }
}

/// Extracts the verified email (and display name) from a provider's
/// user-info response. Twitter wraps the user in `data`.
pub fn parse_identity(provider: Provider, body: &Value) -> Result<FederatedIdentity, UpstreamError> {
    let rejected = |message: &str| UpstreamError::Rejected {
        service: provider.service(),
        status: 400,
        message: message.to_string(),
    };

    let (user, email_field) = match provider {
        Provider::Twitter => (body.get("data").unwrap_or(&Value::Null), "confirmed_email"),
        Provider::Google | Provider::Facebook => (body, "email"),
    };
    if provider == Provider::Google && user.get("email_verified").and_then(Value::as_bool) == Some(false) {
        return Err(rejected("email address is not verified with the provider"));
    }
    let email = user
        .get(email_field)
        .and_then(Value::as_str)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| rejected("no email address was returned for this access token"))?;
    let name = user
        .get("name")
        .or_else(|| user.get("username"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(FederatedIdentity {
        email: normalize_email(email),
        name,
    })
}

/// Username seed for an account created from a federated identity.
pub fn base_username(identity: &FederatedIdentity) -> String {
    let source = identity
        .name
        .as_deref()
        .filter(|name| name.chars().any(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| identity.email.split('@').next().unwrap_or(""));
    let mut base: String = source
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .take(24)
        .collect();
    if base.len() < 3 {
        base = "user".to_string();
    }
    base
}

/// The account for the vouched-for email, created if missing. An unverified
/// local account is verified and loses its password.
fn find_or_create(identity: &FederatedIdentity, connection: &mut PgConnection) -> Result<User, ApiError> {
    let user = connection.transaction(|conn| {
        if let Some(user) = User::find_by_email(&identity.email, conn)? {
            if user.is_verified {
                return Ok(user);
            }
            let user = diesel::update(&user)
                .set((users::is_verified.eq(true), users::password_hash.eq(UNUSABLE_PASSWORD)))
                .get_result::<User>(conn)?;
            tracing::info!(user_id = user.id, "unverified account claimed by federated login");
            return Ok(user);
        }

        let base = base_username(identity);
        let user = db::retry_on_conflict(conn, USERS_USERNAME_KEY, |conn| {
            let taken = users::table
                .select(users::username)
                .filter(users::username.like(format!("{}%", base)))
                .load::<String>(conn)?
                .into_iter()
                .collect::<HashSet<_>>();
            let username = unique_candidate(&base, '_', &taken);
            diesel::insert_into(users::table)
                .values(&NewUser {
                    username: &username,
                    email: &identity.email,
                    password_hash: UNUSABLE_PASSWORD,
                    is_verified: true,
                })
                .get_result::<User>(conn)
        })?;
        tracing::info!(user_id = user.id, username = %user.username, "account created from federated login");
        Ok::<User, diesel::result::Error>(user)
    })?;
    Ok(user)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessToken {
    access_token: String,
}

impl Validate for AccessToken {
    fn validate(self) -> Result<Self, ValidationError> {
        if self.access_token.trim().is_empty() {
            Err(ValidationError::from("access_token", "Access token may not be blank"))
        } else {
            Ok(self)
        }
    }
}

#[post("/oauth/<provider>", format = "json", data = "<body>")]
pub async fn oauth_login(
    provider: Provider,
    db: Db,
    settings: &State<Settings>,
    tokens: &State<TokenService>,
    identity_provider: &State<SharedIdentityProvider>,
    body: Json<AccessToken>,
) -> ApiResult<Value> {
    let body = body.validate()?.into_inner();
    let identity = identity_provider.identify(provider, &body.access_token).await?;

    let user = db.run(move |conn| find_or_create(&identity, conn)).await?;
    let token = user.token(tokens, settings.session_ttl)?;
    tracing::info!(user_id = user.id, provider = provider.service(), "federated login");

    Ok(Json(json!({
        "user": {
            "username": user.username,
            "email": user.email,
            "token": token,
        }
    })))
}
