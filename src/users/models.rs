use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::db::schema::users;
use crate::tokens::{self, Purpose, TokenError, TokenService};
use crate::types::ApiError;
use crate::utils::serialize_date;

/// Stored in place of a hash for accounts that only sign in through an OAuth
/// provider. `bcrypt::verify` never accepts it.
pub const UNUSABLE_PASSWORD: &str = "!";

#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_verified: bool,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn make_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, cost)
    }

    pub fn new_password(&mut self, password: &str, cost: u32) -> Result<(), bcrypt::BcryptError> {
        self.password_hash = User::make_password(password, cost)?;
        Ok(())
    }

    pub fn verify_password(&self, password_to_verify: &str) -> bool {
        bcrypt::verify(password_to_verify, &self.password_hash).unwrap_or(false)
    }

    pub fn token(&self, tokens: &TokenService, ttl: Duration) -> Result<String, TokenError> {
        tokens.issue(self.id, Purpose::Session, ttl)
    }

    /// Changes whenever the password does, so reset links are single-use.
    pub fn reset_stamp(&self) -> String {
        tokens::stamp_of(&self.password_hash)
    }

    pub fn find(user_id: i32, connection: &mut PgConnection) -> QueryResult<Option<User>> {
        users::table.find(user_id).first::<User>(connection).optional()
    }

    pub fn find_by_email(email: &str, connection: &mut PgConnection) -> QueryResult<Option<User>> {
        users::table
            .filter(users::email.eq(email))
            .first::<User>(connection)
            .optional()
    }

    pub fn load_by_name(name: &str, connection: &mut PgConnection) -> Result<User, ApiError> {
        users::table
            .filter(users::username.eq(name))
            .first::<User>(connection)
            .optional()?
            .ok_or_else(|| ApiError::not_found("User with that username does not exist"))
    }
}

/// Checked against when a login names no known account, so that the
/// response takes as long as a wrong password for a real one.
#[derive(Debug, Clone)]
pub struct DecoyHash(String);

impl DecoyHash {
    pub fn new(cost: u32) -> DecoyHash {
        match bcrypt::hash("decoy-password-0", cost) {
            Ok(hash) => DecoyHash(hash),
            Err(e) => {
                tracing::warn!(error = %e, "could not build decoy hash");
                DecoyHash(UNUSABLE_PASSWORD.to_string())
            }
        }
    }

    pub fn burn(&self, password: &str) {
        let _ = bcrypt::verify(password, &self.0);
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub is_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(password_hash: String) -> User {
        User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash,
            is_verified: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn password_round_trip() {
        let hash = User::make_password("test1234", 4).unwrap();
        let alice = user(hash);
        assert!(alice.verify_password("test1234"));
        assert!(!alice.verify_password("test12345"));
    }

    #[test]
    fn unusable_password_never_verifies() {
        let alice = user(UNUSABLE_PASSWORD.to_string());
        assert!(!alice.verify_password(""));
        assert!(!alice.verify_password("!"));
    }

    #[test]
    fn reset_stamp_changes_with_password() {
        let mut alice = user(User::make_password("first1234", 4).unwrap());
        let before = alice.reset_stamp();
        alice.new_password("second1234", 4).unwrap();
        assert_ne!(before, alice.reset_stamp());
    }

    #[test]
    fn decoy_costs_a_real_verification() {
        let decoy = DecoyHash::new(4);
        assert!(decoy.0.starts_with("$2"));
        decoy.burn("anything1");
        assert_eq!(DecoyHash::new(99).0, UNUSABLE_PASSWORD);
    }

    #[test]
    fn serialized_user_hides_secrets() {
        let value = serde_json::to_value(user("hash".into())).unwrap();
        assert!(value.get("password_hash").is_none());
        assert!(value.get("id").is_none());
        assert_eq!(value["username"], "alice");
        assert_eq!(value["is_verified"], true);
    }

    #[test]
    fn session_token_names_user() {
        let tokens = TokenService::new("secret");
        let token = user("hash".into()).token(&tokens, Duration::hours(1)).unwrap();
        assert_eq!(tokens.verify_for(&token, Purpose::Session).unwrap(), 1);
    }
}
