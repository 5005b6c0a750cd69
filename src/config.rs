use chrono::Duration;
use dotenv::dotenv;
use std::env;
use std::time::Duration as StdDuration;

error_chain! {
    errors {
        MissingSetting(name: &'static str) {
            description("missing setting")
            display("missing required setting: {}", name)
        }
        InvalidSetting(name: &'static str, value: String) {
            description("invalid setting")
            display("invalid value for {}: {:?}", name, value)
        }
    }
}

/// Cloudinary account used for image uploads.
#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub enum MailSettings {
    /// Log messages instead of sending them. Used when no SendGrid key is set.
    Console,
    SendGrid { api_key: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub db_pool_size: u32,
    pub db_connect_timeout: StdDuration,
    pub secret_key: String,
    pub session_ttl: Duration,
    pub verification_ttl: Duration,
    pub reset_ttl: Duration,
    pub bcrypt_cost: u32,
    /// Public base URL used when building links sent by email.
    pub domain: String,
    pub from_email: String,
    pub mail: MailSettings,
    pub cloudinary: Option<CloudinaryCredentials>,
    pub upstream_timeout: StdDuration,
}

impl Settings {
    pub fn from_env() -> Result<Settings> {
        dotenv().ok();

        let mail = match optional("SENDGRID_API_KEY") {
            Some(api_key) => MailSettings::SendGrid { api_key },
            None => MailSettings::Console,
        };

        let cloudinary = match (
            optional("CLOUDINARY_NAME"),
            optional("CLOUDINARY_API_KEY"),
            optional("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryCredentials {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => None,
        };

        Ok(Settings {
            database_url: required("DATABASE_URL")?,
            db_pool_size: parsed("DATABASE_POOL_SIZE", 10)?,
            db_connect_timeout: StdDuration::from_secs(parsed("DATABASE_CONNECT_TIMEOUT_SECS", 5)?),
            secret_key: required("SECRET_KEY")?,
            session_ttl: Duration::hours(parsed("SESSION_TTL_HOURS", 24)?),
            verification_ttl: Duration::hours(parsed("VERIFICATION_TTL_HOURS", 24)?),
            reset_ttl: Duration::minutes(parsed("RESET_TTL_MINUTES", 60)?),
            bcrypt_cost: parsed("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            domain: optional("DOMAIN").unwrap_or_else(|| "http://localhost:8000".to_string()),
            from_email: optional("FROM_EMAIL").unwrap_or_else(|| "noreply@authors.local".to_string()),
            mail,
            cloudinary,
            upstream_timeout: StdDuration::from_secs(parsed("UPSTREAM_TIMEOUT_SECS", 10)?),
        })
    }

    /// Settings that need no environment. Collaborators default to their
    /// local variants and the database is only reached on demand.
    pub fn local(database_url: &str, secret_key: &str) -> Settings {
        Settings {
            database_url: database_url.to_string(),
            db_pool_size: 4,
            db_connect_timeout: StdDuration::from_secs(1),
            secret_key: secret_key.to_string(),
            session_ttl: Duration::hours(24),
            verification_ttl: Duration::hours(24),
            reset_ttl: Duration::minutes(60),
            bcrypt_cost: 4,
            domain: "http://localhost:8000".to_string(),
            from_email: "noreply@authors.local".to_string(),
            mail: MailSettings::Console,
            cloudinary: None,
            upstream_timeout: StdDuration::from_secs(5),
        }
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn required(name: &'static str) -> Result<String> {
    optional(name).ok_or_else(|| ErrorKind::MissingSetting(name).into())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ErrorKind::InvalidSetting(name, value).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_falls_back_to_default_when_unset() {
        let value: u64 = parsed("AUTHORS_TEST_UNSET_SETTING", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn parsed_rejects_garbage() {
        env::set_var("AUTHORS_TEST_GARBAGE_SETTING", "ten");
        let result: Result<u64> = parsed("AUTHORS_TEST_GARBAGE_SETTING", 10);
        match result.unwrap_err().kind() {
            ErrorKind::InvalidSetting(name, value) => {
                assert_eq!(*name, "AUTHORS_TEST_GARBAGE_SETTING");
                assert_eq!(value, "ten");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn required_reports_missing_name() {
        let err = required("AUTHORS_TEST_MISSING_SETTING").unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required setting: AUTHORS_TEST_MISSING_SETTING"
        );
    }
}
