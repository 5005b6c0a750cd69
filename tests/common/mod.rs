//! Shared setup for the HTTP-level tests.

#![allow(dead_code)]

use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous;
use rocket::local::blocking::{Client, LocalResponse};
use rocket::serde::json::Value;
use std::sync::Arc;

use authors::config::Settings;
use authors::mail::{Email, Mailer, MemoryMailer, SharedMailer};
use authors::media::MemoryImageHost;
use authors::upstream::UpstreamError;
use authors::users::social::{FederatedIdentity, IdentityProvider, Provider};
use authors::{db, Services};

pub const SECRET: &str = "integration-test-secret";

/// Nothing listens here, so any checkout fails once the pool times out.
pub const UNREACHABLE_DATABASE: &str = "postgres://authors@127.0.0.1:1/authors_test";

const BOUNDARY: &str = "authors-test-boundary";

/// Vouches for whatever email the access token names.
pub struct EchoIdentity;

#[rocket::async_trait]
impl IdentityProvider for EchoIdentity {
    async fn identify(&self, provider: Provider, access_token: &str) -> Result<FederatedIdentity, UpstreamError> {
        if access_token == "revoked" {
            return Err(UpstreamError::Rejected {
                service: provider.service(),
                status: 401,
                message: "Invalid OAuth access token".into(),
            });
        }
        Ok(FederatedIdentity {
            email: access_token.to_string(),
            name: None,
        })
    }
}

/// An email service that never answers in time.
pub struct DownMailer;

#[rocket::async_trait]
impl Mailer for DownMailer {
    async fn send(&self, _email: Email) -> Result<(), UpstreamError> {
        Err(UpstreamError::Timeout {
            service: "email service",
            timeout_secs: 5,
        })
    }
}

pub struct TestApp {
    pub client: Client,
    pub mailer: Arc<MemoryMailer>,
    pub images: Arc<MemoryImageHost>,
}

fn rocket_for(database_url: &str, mailer: SharedMailer, images: Arc<MemoryImageHost>) -> rocket::Rocket<rocket::Build> {
    let settings = Settings::local(database_url, SECRET);
    let pool = db::init_pool(&settings);
    if database_url != UNREACHABLE_DATABASE {
        db::run_migrations(&pool).expect("migrations should apply");
    }
    let services = Services {
        mailer,
        images,
        identity: Arc::new(EchoIdentity),
    };
    authors::build(settings, pool, services)
}

pub fn app(database_url: &str) -> TestApp {
    let mailer = Arc::new(MemoryMailer::default());
    let images = Arc::new(MemoryImageHost::default());
    let rocket = rocket_for(database_url, mailer.clone(), images.clone());
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestApp { client, mailer, images }
}

/// An app whose outbound email always fails.
pub fn app_without_mail(database_url: &str) -> Client {
    let rocket = rocket_for(database_url, Arc::new(DownMailer), Arc::new(MemoryImageHost::default()));
    Client::tracked(rocket).expect("valid rocket instance")
}

/// An async client, for dispatching requests concurrently.
pub async fn async_client(database_url: &str) -> (asynchronous::Client, Arc<MemoryMailer>) {
    let mailer = Arc::new(MemoryMailer::default());
    let rocket = rocket_for(database_url, mailer.clone(), Arc::new(MemoryImageHost::default()));
    let client = asynchronous::Client::tracked(rocket)
        .await
        .expect("valid rocket instance");
    (client, mailer)
}

/// An app whose database can never be reached.
pub fn offline_app() -> TestApp {
    app(UNREACHABLE_DATABASE)
}

pub fn test_database_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for database tests")
}

pub fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", token))
}

pub fn json_body(response: LocalResponse<'_>) -> Value {
    response.into_json::<Value>().expect("response body should be JSON")
}

pub fn expect(response: LocalResponse<'_>, status: Status) -> Value {
    assert_eq!(response.status(), status);
    json_body(response)
}

/// Last path segment of the first link in an email body.
pub fn token_in(body: &str) -> String {
    body.lines()
        .find(|line| line.contains("/api/users/"))
        .and_then(|line| line.trim().rsplit('/').next())
        .map(str::to_string)
        .expect("email should contain a link")
}

/// A `multipart/form-data` body with one `file` field.
pub fn upload_form(file_name: &str, content_type: &str, bytes: &[u8]) -> (ContentType, Vec<u8>) {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {ct}\r\n\r\n",
        b = BOUNDARY,
        name = file_name,
        ct = content_type,
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    let content_type = ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY));
    (content_type, body)
}
