use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use rocket::data::{Data, Limits};
use rocket::form::Form;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::{json, Json, Value};
use rocket::State;
use serde::{Deserialize, Serialize};

use crate::article::ImageForm;
use crate::db::schema::{articles, follows, profiles};
use crate::db::Db;
use crate::media::{self, SharedImageHost, UploadError, ALLOWED_FORMATS};
use crate::types::{read_payload, ApiError, ApiResult, Validate, ValidationError};
use crate::users::auth::{ensure_owner, Owned, RequestContext};
use crate::users::models::User;

pub const MAX_BIO_LENGTH: usize = 300;
pub const MAX_NAME_LENGTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, AsChangeset)]
#[diesel(table_name = profiles)]
#[diesel(treat_none_as_null = true)]
pub struct Profile {
    pub id: i32,
    pub user_id: i32,
    pub bio: String,
    pub name: String,
    pub avatar: Option<String>,
}

impl Owned for Profile {
    fn owner_id(&self) -> i32 {
        self.user_id
    }
}

impl Profile {
    pub fn find_for(user: &User, connection: &mut PgConnection) -> QueryResult<Option<Profile>> {
        profiles::table
            .filter(profiles::user_id.eq(user.id))
            .first::<Profile>(connection)
            .optional()
    }

    /// The user named `username` together with their profile.
    pub fn load_by_name(username: &str, connection: &mut PgConnection) -> Result<(User, Profile), ApiError> {
        let user = User::load_by_name(username, connection)?;
        let profile = Profile::find_for(&user, connection)?
            .ok_or_else(|| ApiError::not_found("User with that profile does not exist"))?;
        Ok((user, profile))
    }
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct FollowCounts {
    pub followers: i64,
    pub following: i64,
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    username: String,
    bio: String,
    name: String,
    avatar: Option<String>,
    followers: i64,
    following: i64,
    total_articles: i64,
    is_following: bool,
}

impl ProfileView {
    fn new(user: User, profile: Option<Profile>, counts: FollowCounts, total_articles: i64, is_following: bool) -> Self {
        let (bio, name, avatar) = match profile {
            Some(profile) => (profile.bio, profile.name, profile.avatar),
            None => (String::new(), String::new(), None),
        };
        ProfileView {
            username: user.username,
            bio,
            name,
            avatar,
            followers: counts.followers,
            following: counts.following,
            total_articles,
            is_following,
        }
    }
}

fn is_following(follower_id: i32, followed_id: i32, connection: &mut PgConnection) -> QueryResult<bool> {
    select(exists(
        follows::table
            .filter(follows::follower_id.eq(follower_id))
            .filter(follows::followed_id.eq(followed_id)),
    ))
    .get_result::<bool>(connection)
}

/// Counts are computed from the stored follow and article rows on every read.
fn load_view(
    user: User,
    profile: Option<Profile>,
    viewer: Option<i32>,
    connection: &mut PgConnection,
) -> QueryResult<ProfileView> {
    let followers = follows::table
        .filter(follows::followed_id.eq(user.id))
        .count()
        .get_result::<i64>(connection)?;
    let following = follows::table
        .filter(follows::follower_id.eq(user.id))
        .count()
        .get_result::<i64>(connection)?;
    let total_articles = articles::table
        .filter(articles::author_id.eq(user.id))
        .filter(articles::is_published.eq(true))
        .count()
        .get_result::<i64>(connection)?;
    let followed = match viewer {
        Some(viewer) if viewer != user.id => is_following(viewer, user.id, connection)?,
        _ => false,
    };
    let counts = FollowCounts { followers, following };
    Ok(ProfileView::new(user, profile, counts, total_articles, followed))
}

fn check_bio(bio: &str, errors: &mut ValidationError) {
    if bio.chars().count() > MAX_BIO_LENGTH {
        errors.add_error("bio", format!("Bio may not exceed {} characters", MAX_BIO_LENGTH));
    }
}

fn check_name(name: &str, errors: &mut ValidationError) {
    if name.chars().count() > MAX_NAME_LENGTH {
        errors.add_error("name", format!("Name may not exceed {} characters", MAX_NAME_LENGTH));
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileDetails {
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl Validate for ProfileDetails {
    fn validate(self) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::default();
        if let Some(bio) = &self.bio {
            check_bio(bio, &mut errors);
        }
        if let Some(name) = &self.name {
            check_name(name, &mut errors);
        }
        errors.into_result(self)
    }
}

impl ProfileDetails {
    pub fn apply(self, profile: &mut Profile) {
        if let Some(bio) = self.bio {
            profile.bio = bio;
        }
        if let Some(name) = self.name {
            profile.name = name;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePayload {
    #[serde(default)]
    profile: ProfileDetails,
}

#[post("/", format = "json", data = "<create>")]
pub async fn create(user: User, db: Db, create: Json<ProfilePayload>) -> Result<Custom<Json<Value>>, ApiError> {
    let details = create.into_inner().profile.validate()?;
    let success = format!("Profile for '{}' created successfully", user.username);
    let user_id = user.id;

    let view = db
        .run(move |conn| {
            if Profile::find_for(&user, conn)?.is_some() {
                return Err(ValidationError::from("profile", "A profile for this user already exists").into());
            }
            let profile = diesel::insert_into(profiles::table)
                .values((
                    profiles::user_id.eq(user.id),
                    profiles::bio.eq(details.bio.unwrap_or_default()),
                    profiles::name.eq(details.name.unwrap_or_default()),
                ))
                .get_result::<Profile>(conn)?;
            let viewer = Some(user.id);
            Ok(load_view(user, Some(profile), viewer, conn)?)
        })
        .await?;

    tracing::info!(user_id, "profile created");
    Ok(Custom(
        Status::Created,
        Json(json!({ "success": success, "profile": view })),
    ))
}

#[get("/<username>")]
pub async fn get(context: RequestContext, db: Db, username: String) -> ApiResult<Value> {
    let viewer = context.user_id();
    let view = db
        .run(move |conn| {
            let (user, profile) = Profile::load_by_name(&username, conn)?;
            Ok(load_view(user, Some(profile), viewer, conn)?)
        })
        .await?;
    Ok(Json(json!({ "profile": view })))
}

/// The payload is read only once the caller is known to own the profile.
#[put("/<username>", data = "<update>")]
pub async fn update(user: User, db: Db, limits: &Limits, username: String, update: Data<'_>) -> ApiResult<Value> {
    let (owner, mut profile) = db.run(move |conn| Profile::load_by_name(&username, conn)).await?;
    ensure_owner(&profile, &user, "You are not allowed to edit this profile")?;

    let details = read_payload::<ProfilePayload>(update, limits).await?.profile.validate()?;
    details.apply(&mut profile);
    let viewer = Some(user.id);
    let view = db
        .run(move |conn| {
            let profile = diesel::update(&profile).set(&profile).get_result::<Profile>(conn)?;
            Ok(load_view(owner, Some(profile), viewer, conn)?)
        })
        .await?;

    tracing::info!(user_id = user.id, "profile updated");
    Ok(Json(json!({ "success": "Profile updated successfully", "profile": view })))
}

#[patch("/<username>/avatar", data = "<form>")]
pub async fn avatar(
    user: User,
    db: Db,
    host: &State<SharedImageHost>,
    username: String,
    form: Form<ImageForm<'_>>,
) -> ApiResult<Value> {
    let (_, profile) = db.run(move |conn| Profile::load_by_name(&username, conn)).await?;
    ensure_owner(&profile, &user, "You are not allowed to edit this profile")?;

    let file = form.file().ok_or(UploadError::Missing)?;
    let url = media::upload(host.inner().as_ref(), file, ALLOWED_FORMATS).await?;

    let stored = url.clone();
    db.run(move |conn| {
        diesel::update(&profile)
            .set(profiles::avatar.eq(Some(&stored)))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    tracing::info!(user_id = user.id, "avatar updated");
    Ok(Json(json!({ "success": "Profile avatar was updated successfully", "avatar": url })))
}

#[post("/<username>/follow")]
pub async fn follow(user: User, db: Db, username: String) -> ApiResult<Value> {
    let follower_id = user.id;
    let (message, view) = db
        .run(move |conn| {
            let target = User::load_by_name(&username, conn)?;
            if target.id == follower_id {
                return Err(ValidationError::from("follow", "You cannot follow yourself").into());
            }

            diesel::insert_into(follows::table)
                .values((follows::follower_id.eq(follower_id), follows::followed_id.eq(target.id)))
                .on_conflict((follows::follower_id, follows::followed_id))
                .do_nothing()
                .execute(conn)?;

            tracing::info!(user_id = follower_id, followed_id = target.id, "user followed");
            let message = format!("You are now following {}", target.username);
            let profile = Profile::find_for(&target, conn)?;
            Ok((message, load_view(target, profile, Some(follower_id), conn)?))
        })
        .await?;
    Ok(Json(json!({ "message": message, "profile": view })))
}

#[delete("/<username>/follow")]
pub async fn unfollow(user: User, db: Db, username: String) -> ApiResult<Value> {
    let follower_id = user.id;
    let (message, view) = db
        .run(move |conn| {
            let target = User::load_by_name(&username, conn)?;
            let removed = diesel::delete(
                follows::table
                    .filter(follows::follower_id.eq(follower_id))
                    .filter(follows::followed_id.eq(target.id)),
            )
            .execute(conn)?;
            if removed == 0 {
                return Err(ApiError::not_found(format!("You are not following {}", target.username)));
            }

            tracing::info!(user_id = follower_id, followed_id = target.id, "user unfollowed");
            let message = format!("You are no longer following {}", target.username);
            let profile = Profile::find_for(&target, conn)?;
            Ok((message, load_view(target, profile, Some(follower_id), conn)?))
        })
        .await?;
    Ok(Json(json!({ "message": message, "profile": view })))
}
