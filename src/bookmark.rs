use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::{json, Json, Value};
use serde::Serialize;

use crate::article::Article;
use crate::db::schema::{articles, bookmarks};
use crate::db::Db;
use crate::types::{ApiError, ApiResult};
use crate::users::models::User;
use crate::utils::serialize_date;

#[derive(Debug, Queryable)]
pub struct Bookmark {
    pub id: i32,
    pub user_id: i32,
    pub article_id: i32,
    pub article_title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BookmarkView {
    slug: String,
    article_title: String,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
}

impl Bookmark {
    fn view(self, slug: String) -> BookmarkView {
        BookmarkView {
            slug,
            article_title: self.article_title,
            created_at: self.created_at,
        }
    }
}

/// Bookmarks an article. Bookmarking it again refreshes the stored title.
#[post("/<slug>/bookmark")]
pub async fn bookmark(user: User, db: Db, slug: String) -> Result<Custom<Json<Value>>, ApiError> {
    let user_id = user.id;
    let view = db
        .run(move |conn| {
            let article = Article::load_visible(&slug, Some(user_id), conn)?;
            let saved = diesel::insert_into(bookmarks::table)
                .values((
                    bookmarks::user_id.eq(user_id),
                    bookmarks::article_id.eq(article.id),
                    bookmarks::article_title.eq(&article.title),
                ))
                .on_conflict((bookmarks::user_id, bookmarks::article_id))
                .do_update()
                .set(bookmarks::article_title.eq(&article.title))
                .get_result::<Bookmark>(conn)?;
            Ok(saved.view(article.slug))
        })
        .await?;

    tracing::info!(user_id, slug = %view.slug, "article bookmarked");
    Ok(Custom(
        Status::Created,
        Json(json!({ "message": "Article bookmarked", "bookmark": view })),
    ))
}

#[delete("/<slug>/bookmark")]
pub async fn unbookmark(user: User, db: Db, slug: String) -> ApiResult<Value> {
    let user_id = user.id;
    db.run(move |conn| {
        let article = Article::load_by_slug(&slug, conn)?;
        let removed = diesel::delete(
            bookmarks::table
                .filter(bookmarks::user_id.eq(user_id))
                .filter(bookmarks::article_id.eq(article.id)),
        )
        .execute(conn)?;
        if removed == 0 {
            return Err(ApiError::not_found("This article is not bookmarked"));
        }
        tracing::info!(user_id, slug = %article.slug, "bookmark removed");
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "message": "Bookmark removed" })))
}

#[get("/")]
pub async fn list(user: User, db: Db) -> ApiResult<Value> {
    let user_id = user.id;
    let bookmarks = db
        .run(move |conn| {
            Ok(bookmarks::table
                .inner_join(articles::table)
                .filter(bookmarks::user_id.eq(user_id))
                .order(bookmarks::created_at.desc())
                .select((bookmarks::all_columns, articles::slug))
                .load::<(Bookmark, String)>(conn)?
                .into_iter()
                .map(|(bookmark, slug)| bookmark.view(slug))
                .collect::<Vec<_>>())
        })
        .await?;
    Ok(Json(json!({ "bookmarks": bookmarks })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_uses_the_stored_title() {
        let bookmark = Bookmark {
            id: 1,
            user_id: 2,
            article_id: 3,
            article_title: "Foo".into(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(bookmark.view("foo".into())).unwrap();
        assert_eq!(value["slug"], "foo");
        assert_eq!(value["article_title"], "Foo");
        assert!(value.get("user_id").is_none());
    }
}
