#[macro_use]
extern crate rocket;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;

pub mod article;
pub mod bookmark;
pub mod comment;
pub mod config;
pub mod db;
pub mod mail;
pub mod media;
pub mod profile;
pub mod tokens;
pub mod types;
pub mod upstream;
pub mod users;
pub mod utils;

use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::AdHoc;
use rocket::serde::json::{json, Json, Value};
use rocket::{Build, Request, Rocket};

use crate::config::Settings;
use crate::db::Pool;
use crate::mail::SharedMailer;
use crate::media::SharedImageHost;
use crate::tokens::TokenService;
use crate::users::auth::Rejection;
use crate::users::models::DecoyHash;
use crate::users::social::{HttpIdentityProvider, SharedIdentityProvider};

/// External collaborators the handlers talk to.
pub struct Services {
    pub mailer: SharedMailer,
    pub images: SharedImageHost,
    pub identity: SharedIdentityProvider,
}

impl Services {
    pub fn from_settings(settings: &Settings) -> reqwest::Result<Services> {
        Ok(Services {
            mailer: mail::from_settings(settings)?,
            images: media::from_settings(settings)?,
            identity: std::sync::Arc::new(HttpIdentityProvider::new(settings)?),
        })
    }
}

#[catch(400)]
fn bad_request() -> Json<Value> {
    Json(json!({ "errors": { "body": ["The request could not be understood"] } }))
}

#[catch(401)]
fn unauthorized(req: &Request) -> Json<Value> {
    let rejection = req.local_cache(Rejection::default);
    let message = rejection
        .0
        .as_deref()
        .unwrap_or("Authentication credentials were not provided");
    Json(json!({ "message": message }))
}

#[catch(403)]
fn forbidden() -> Json<Value> {
    Json(json!({ "message": "You do not have permission to perform this action" }))
}

#[catch(404)]
fn not_found() -> Json<Value> {
    Json(json!({ "message": "The requested resource does not exist" }))
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    Json(json!({ "errors": { "body": ["The request body could not be parsed"] } }))
}

#[catch(500)]
fn internal_error() -> Json<Value> {
    Json(json!({ "message": "Internal server error" }))
}

#[catch(503)]
fn unavailable() -> Json<Value> {
    Json(json!({ "message": "Service temporarily unavailable" }))
}

/// Assembles the application around an already built pool.
pub fn build(settings: Settings, pool: Pool, services: Services) -> Rocket<Build> {
    let limits = Limits::default()
        .limit("json", 1.mebibytes())
        .limit("file", 5.mebibytes())
        .limit("data-form", 6.mebibytes());
    let figment = rocket::Config::figment().merge(("limits", limits));
    let tokens = TokenService::new(&settings.secret_key);
    let decoy = DecoyHash::new(settings.bcrypt_cost);

    rocket::custom(figment)
        .manage(pool)
        .manage(tokens)
        .manage(decoy)
        .manage(services.mailer)
        .manage(services.images)
        .manage(services.identity)
        .manage(settings)
        .attach(AdHoc::on_response("Request log", |req, res| {
            Box::pin(async move {
                tracing::info!(method = %req.method(), uri = %req.uri(), status = res.status().code, "request");
            })
        }))
        .mount(
            "/api/users",
            routes![
                users::register,
                users::login,
                users::verify_email,
                users::request_password_reset,
                users::set_password,
                users::social::oauth_login,
            ],
        )
        .mount("/api", routes![users::current, users::update])
        .mount(
            "/api/articles",
            routes![
                article::list,
                article::create,
                article::get,
                article::update,
                article::delete,
                article::like,
                article::dislike,
                article::clear_reaction,
                article::upload_image,
                article::images,
                article::share,
                comment::list,
                comment::create,
                comment::get,
                comment::update,
                comment::delete,
                comment::history,
                bookmark::bookmark,
                bookmark::unbookmark,
            ],
        )
        .mount(
            "/api/profiles",
            routes![
                profile::create,
                profile::get,
                profile::update,
                profile::avatar,
                profile::follow,
                profile::unfollow,
            ],
        )
        .mount("/api/bookmarks", routes![bookmark::list])
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized,
                forbidden,
                not_found,
                unprocessable,
                internal_error,
                unavailable
            ],
        )
}
