use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rocket::data::{Data, Limits};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::{json, Json, Value};
use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::db::schema::{comment_edits, comments, users};
use crate::db::Db;
use crate::types::{read_payload, ApiError, ApiResult, Validate, ValidationError};
use crate::users::auth::{ensure_owner, Owned, RequestContext};
use crate::users::models::User;
use crate::utils::serialize_date;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub article_id: i32,
    pub user_id: i32,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Owned for Comment {
    fn owner_id(&self) -> i32 {
        self.user_id
    }
}

impl Comment {
    pub fn load(article_id: i32, comment_id: i32, connection: &mut PgConnection) -> Result<Comment, ApiError> {
        comments::table
            .filter(comments::article_id.eq(article_id))
            .filter(comments::id.eq(comment_id))
            .first::<Comment>(connection)
            .optional()?
            .ok_or_else(|| ApiError::not_found("Comment not found"))
    }

    fn view(self, author: String) -> CommentView {
        CommentView {
            id: self.id,
            body: self.body,
            author,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    id: i32,
    body: String,
    author: String,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    updated_at: DateTime<Utc>,
}

/// A previous body of a comment, kept when the author edits it.
#[derive(Debug, Queryable, Serialize)]
pub struct CommentEdit {
    #[serde(skip_serializing)]
    pub id: i32,
    #[serde(skip_serializing)]
    pub comment_id: i32,
    pub body: String,
    #[serde(serialize_with = "serialize_date")]
    pub edited_at: DateTime<Utc>,
}

fn author_of(comment: &Comment, connection: &mut PgConnection) -> QueryResult<String> {
    users::table
        .find(comment.user_id)
        .select(users::username)
        .first::<String>(connection)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentBody {
    body: String,
}

impl Validate for CommentBody {
    fn validate(self) -> Result<Self, ValidationError> {
        if self.body.trim().is_empty() {
            Err(ValidationError::from("body", "Comment may not be blank"))
        } else {
            Ok(self)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentPayload {
    comment: CommentBody,
}

#[get("/<slug>/comments")]
pub async fn list(context: RequestContext, db: Db, slug: String) -> ApiResult<Value> {
    let viewer = context.user_id();
    let comments = db
        .run(move |conn| {
            let article = Article::load_visible(&slug, viewer, conn)?;
            Ok(comments::table
                .inner_join(users::table)
                .filter(comments::article_id.eq(article.id))
                .order(comments::created_at.asc())
                .select((comments::all_columns, users::username))
                .load::<(Comment, String)>(conn)?
                .into_iter()
                .map(|(comment, author)| comment.view(author))
                .collect::<Vec<_>>())
        })
        .await?;
    Ok(Json(json!({ "comments": comments })))
}

#[post("/<slug>/comments", format = "json", data = "<new_comment>")]
pub async fn create(
    user: User,
    db: Db,
    slug: String,
    new_comment: Json<CommentPayload>,
) -> Result<Custom<Json<Value>>, ApiError> {
    let body = new_comment.into_inner().comment.validate()?.body;
    let author_id = user.id;

    let (comment, slug) = db
        .run(move |conn| {
            let article = Article::load_visible(&slug, Some(author_id), conn)?;
            let comment = diesel::insert_into(comments::table)
                .values((
                    comments::article_id.eq(article.id),
                    comments::user_id.eq(author_id),
                    comments::body.eq(&body),
                ))
                .get_result::<Comment>(conn)?;
            Ok((comment, article.slug))
        })
        .await?;

    tracing::info!(user_id = user.id, comment_id = comment.id, %slug, "comment created");
    Ok(Custom(
        Status::Created,
        Json(json!({ "comment": comment.view(user.username) })),
    ))
}

#[get("/<slug>/comments/<id>")]
pub async fn get(context: RequestContext, db: Db, slug: String, id: i32) -> ApiResult<Value> {
    let viewer = context.user_id();
    let view = db
        .run(move |conn| {
            let article = Article::load_visible(&slug, viewer, conn)?;
            let comment = Comment::load(article.id, id, conn)?;
            let author = author_of(&comment, conn)?;
            Ok(comment.view(author))
        })
        .await?;
    Ok(Json(json!({ "comment": view })))
}

async fn load_comment(db: &Db, slug: String, id: i32, viewer: i32) -> Result<Comment, ApiError> {
    db.run(move |conn| {
        let article = Article::load_visible(&slug, Some(viewer), conn)?;
        Comment::load(article.id, id, conn)
    })
    .await
}

/// Replaces the body and keeps the previous one in the edit history. The
/// payload is read only once the caller is known to be the author.
#[put("/<slug>/comments/<id>", data = "<update>")]
pub async fn update(
    user: User,
    db: Db,
    limits: &Limits,
    slug: String,
    id: i32,
    update: Data<'_>,
) -> ApiResult<Value> {
    let comment = load_comment(&db, slug, id, user.id).await?;
    ensure_owner(&comment, &user, "You can only edit your own comments")?;

    let body = read_payload::<CommentPayload>(update, limits)
        .await?
        .comment
        .validate()?
        .body;

    let updated = db
        .run(move |conn| {
            Ok(conn.transaction(|conn| {
                diesel::insert_into(comment_edits::table)
                    .values((
                        comment_edits::comment_id.eq(comment.id),
                        comment_edits::body.eq(&comment.body),
                    ))
                    .execute(conn)?;
                diesel::update(&comment)
                    .set((comments::body.eq(&body), comments::updated_at.eq(Utc::now())))
                    .get_result::<Comment>(conn)
            })?)
        })
        .await?;

    tracing::info!(user_id = user.id, comment_id = updated.id, "comment edited");
    Ok(Json(json!({ "comment": updated.view(user.username) })))
}

#[delete("/<slug>/comments/<id>")]
pub async fn delete(user: User, db: Db, slug: String, id: i32) -> ApiResult<Value> {
    let comment = load_comment(&db, slug, id, user.id).await?;
    ensure_owner(&comment, &user, "You can only delete your own comments")?;

    let comment_id = comment.id;
    db.run(move |conn| {
        diesel::delete(&comment).execute(conn)?;
        Ok(())
    })
    .await?;
    tracing::info!(user_id = user.id, comment_id, "comment deleted");
    Ok(Json(json!({ "message": "Comment deleted successfully" })))
}

#[get("/<slug>/comments/<id>/history")]
pub async fn history(context: RequestContext, db: Db, slug: String, id: i32) -> ApiResult<Value> {
    let viewer = context.user_id();
    let (comment_id, edits) = db
        .run(move |conn| {
            let article = Article::load_visible(&slug, viewer, conn)?;
            let comment = Comment::load(article.id, id, conn)?;
            let edits = comment_edits::table
                .filter(comment_edits::comment_id.eq(comment.id))
                .order((comment_edits::edited_at.asc(), comment_edits::id.asc()))
                .load::<CommentEdit>(conn)?;
            Ok((comment.id, edits))
        })
        .await?;
    Ok(Json(json!({ "comment": comment_id, "history": edits })))
}
