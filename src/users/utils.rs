use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use regex::Regex;

use crate::db::schema::users;
use crate::types::ValidationError;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
    static ref USERNAME_RE: Regex = Regex::new(r"\A[A-Za-z0-9_]{3,30}\z").unwrap();
    static ref PASSWORD_RE: Regex = Regex::new(r"\A[a-zA-Z0-9]+\z").unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email_re(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        Err(ValidationError::from("email", format!("Invalid email: {}", email)))
    } else {
        Ok(())
    }
}

pub fn validate_username_re(username: &str) -> Result<(), ValidationError> {
    if !USERNAME_RE.is_match(username) {
        Err(ValidationError::from(
            "username",
            "Username must be 3 to 30 letters, digits or underscores",
        ))
    } else {
        Ok(())
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    if password.len() < MIN_PASSWORD_LENGTH {
        errors.add_error(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_LENGTH),
        );
    }
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !PASSWORD_RE.is_match(password) || !has_letter || !has_digit {
        errors.add_error("password", "The password has to contain letters and numbers only");
    }
    errors.into_result(())
}

/// Uniqueness of email and username against stored users, excluding
/// `except_id` when given.
pub fn validate_available(
    email: Option<&str>,
    username: Option<&str>,
    except_id: Option<i32>,
    connection: &mut PgConnection,
) -> QueryResult<Result<(), ValidationError>> {
    let mut errors = ValidationError::default();
    let other = except_id.unwrap_or(-1);

    if let Some(email) = email {
        let taken = select(exists(
            users::table.filter(users::email.eq(email)).filter(users::id.ne(other)),
        ))
        .get_result::<bool>(connection)?;
        if taken {
            errors.add_error("email", "Email already exists");
        }
    }

    if let Some(username) = username {
        let taken = select(exists(
            users::table
                .filter(users::username.eq(username))
                .filter(users::id.ne(other)),
        ))
        .get_result::<bool>(connection)?;
        if taken {
            errors.add_error("username", "Username already exists");
        }
    }

    Ok(errors.into_result(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(validate_email_re("test@mail.com").is_ok());
        assert!(validate_email_re(&normalize_email("  Test@Mail.COM ")).is_ok());
        assert!(validate_email_re("not-an-email").is_err());
        assert!(validate_email_re("a@b").is_err());
    }

    #[test]
    fn usernames() {
        assert!(validate_username_re("alice_01").is_ok());
        assert!(validate_username_re("al").is_err());
        assert!(validate_username_re("has space").is_err());
        assert!(validate_username_re(&"x".repeat(31)).is_err());
    }

    #[test]
    fn passwords_need_letters_and_digits() {
        assert!(validate_password("test1234").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("1234567890").is_err());
        let err = validate_password("with space 1").unwrap_err();
        assert_eq!(err.messages("password").len(), 1);
    }
}
