use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use reqwest::Url;
use rocket::data::{Data, Limits};
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::request::FromParam;
use rocket::response::status::Custom;
use rocket::serde::json::{json, Json, Value};
use rocket::State;
use serde::{Deserialize, Serialize};
use slug::slugify;
use std::collections::{HashMap, HashSet};

use crate::config::Settings;
use crate::db::schema::{article_images, articles, reactions, users};
use crate::db::{retry_on_conflict, Db, ARTICLES_SLUG_KEY};
use crate::media::{self, SharedImageHost, ALLOWED_FORMATS};
use crate::types::{read_payload, ApiError, ApiResult, Validate, ValidationError};
use crate::users::auth::{ensure_owner, Owned, RequestContext};
use crate::users::models::User;
use crate::utils::{page, serialize_date, unique_candidate};

pub const MAX_TITLE_LENGTH: usize = 100;
pub const MAX_DESCRIPTION_LENGTH: usize = 128;
const WORDS_PER_MINUTE: usize = 200;

#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset)]
#[diesel(table_name = articles)]
pub struct Article {
    pub id: i32,
    pub author_id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub is_published: bool,
    pub read_time: i32,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

impl Owned for Article {
    fn owner_id(&self) -> i32 {
        self.author_id
    }
}

impl Article {
    /// Drafts are only visible to their author.
    pub fn visible_to(&self, viewer: Option<i32>) -> bool {
        self.is_published || viewer == Some(self.author_id)
    }

    pub fn load_by_slug(slug: &str, connection: &mut PgConnection) -> Result<Article, ApiError> {
        articles::table
            .filter(articles::slug.eq(slug))
            .first::<Article>(connection)
            .optional()?
            .ok_or_else(|| ApiError::not_found("Article not found"))
    }

    /// Like `load_by_slug`, but hides drafts from everyone except the author.
    pub fn load_visible(slug: &str, viewer: Option<i32>, connection: &mut PgConnection) -> Result<Article, ApiError> {
        let article = Article::load_by_slug(slug, connection)?;
        if article.visible_to(viewer) {
            Ok(article)
        } else {
            Err(ApiError::not_found("Article not found"))
        }
    }

    fn view(self, author: String, counts: ReactionCounts, reaction: Option<Polarity>) -> ArticleView {
        ArticleView {
            slug: self.slug,
            title: self.title,
            description: self.description,
            body: self.body,
            author,
            is_published: self.is_published,
            read_time: self.read_time,
            like_count: counts.likes,
            dislike_count: counts.dislikes,
            reaction,
            date_created: self.date_created,
            date_modified: self.date_modified,
        }
    }
}

/// Estimated minutes to read `body`, never less than one.
pub fn read_time(body: &str) -> i32 {
    let words = body.split_whitespace().count();
    let minutes = (words + WORDS_PER_MINUTE - 1) / WORDS_PER_MINUTE;
    minutes.max(1) as i32
}

pub fn slug_base(title: &str) -> String {
    let base = slugify(title);
    if base.is_empty() {
        "article".to_string()
    } else {
        base
    }
}

/// A slug for `title` that no stored article uses yet.
pub fn unique_slug(title: &str, connection: &mut PgConnection) -> QueryResult<String> {
    let base = slug_base(title);
    let taken = articles::table
        .select(articles::slug)
        .filter(articles::slug.like(format!("{}%", base)))
        .load::<String>(connection)?
        .into_iter()
        .collect::<HashSet<_>>();
    Ok(unique_candidate(&base, '-', &taken))
}

#[derive(Debug, Serialize)]
pub struct ArticleView {
    slug: String,
    title: String,
    description: String,
    body: String,
    author: String,
    is_published: bool,
    read_time: i32,
    like_count: i64,
    dislike_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reaction: Option<Polarity>,
    #[serde(serialize_with = "serialize_date")]
    date_created: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    date_modified: DateTime<Utc>,
}

/// Author name, live reaction counts and the viewer's own reaction.
fn load_view(article: Article, viewer: Option<i32>, connection: &mut PgConnection) -> QueryResult<ArticleView> {
    let author = users::table
        .find(article.author_id)
        .select(users::username)
        .first::<String>(connection)?;
    let counts = ReactionCounts::for_article(article.id, connection)?;
    let reaction = match viewer {
        Some(user_id) => Polarity::of(user_id, article.id, connection)?,
        None => None,
    };
    Ok(article.view(author, counts, reaction))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Like,
    Dislike,
}

impl Polarity {
    pub fn stored(self) -> i16 {
        match self {
            Polarity::Like => 1,
            Polarity::Dislike => 0,
        }
    }

    pub fn from_stored(value: i16) -> Option<Polarity> {
        match value {
            1 => Some(Polarity::Like),
            0 => Some(Polarity::Dislike),
            _ => None,
        }
    }

    fn of(user_id: i32, article_id: i32, connection: &mut PgConnection) -> QueryResult<Option<Polarity>> {
        let stored = reactions::table
            .filter(reactions::user_id.eq(user_id))
            .filter(reactions::article_id.eq(article_id))
            .select(reactions::polarity)
            .first::<i16>(connection)
            .optional()?;
        Ok(stored.and_then(Polarity::from_stored))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactionCounts {
    pub likes: i64,
    pub dislikes: i64,
}

impl ReactionCounts {
    /// Folds `(polarity, count)` rows from a grouped count.
    pub fn tally<I: IntoIterator<Item = (i16, i64)>>(rows: I) -> ReactionCounts {
        let mut counts = ReactionCounts::default();
        for (polarity, n) in rows {
            match Polarity::from_stored(polarity) {
                Some(Polarity::Like) => counts.likes += n,
                Some(Polarity::Dislike) => counts.dislikes += n,
                None => {}
            }
        }
        counts
    }

    pub fn for_article(article_id: i32, connection: &mut PgConnection) -> QueryResult<ReactionCounts> {
        let rows = reactions::table
            .filter(reactions::article_id.eq(article_id))
            .group_by(reactions::polarity)
            .select((reactions::polarity, count_star()))
            .load::<(i16, i64)>(connection)?;
        Ok(ReactionCounts::tally(rows))
    }

    pub fn for_articles(ids: &[i32], connection: &mut PgConnection) -> QueryResult<HashMap<i32, ReactionCounts>> {
        let rows = reactions::table
            .filter(reactions::article_id.eq_any(ids))
            .group_by((reactions::article_id, reactions::polarity))
            .select((reactions::article_id, reactions::polarity, count_star()))
            .load::<(i32, i16, i64)>(connection)?;
        let mut grouped: HashMap<i32, Vec<(i16, i64)>> = HashMap::new();
        for (article_id, polarity, n) in rows {
            grouped.entry(article_id).or_default().push((polarity, n));
        }
        Ok(grouped
            .into_iter()
            .map(|(id, rows)| (id, ReactionCounts::tally(rows)))
            .collect())
    }
}

/// Records `polarity` as the user's only reaction to the article.
pub fn react(user_id: i32, article_id: i32, polarity: Polarity, connection: &mut PgConnection) -> QueryResult<()> {
    diesel::insert_into(reactions::table)
        .values((
            reactions::user_id.eq(user_id),
            reactions::article_id.eq(article_id),
            reactions::polarity.eq(polarity.stored()),
        ))
        .on_conflict((reactions::user_id, reactions::article_id))
        .do_update()
        .set(reactions::polarity.eq(polarity.stored()))
        .execute(connection)?;
    Ok(())
}

#[derive(Insertable)]
#[diesel(table_name = articles)]
struct NewArticle<'a> {
    author_id: i32,
    slug: &'a str,
    title: &'a str,
    description: &'a str,
    body: &'a str,
    is_published: bool,
    read_time: i32,
}

fn check_title(title: &str, errors: &mut ValidationError) {
    if title.trim().is_empty() {
        errors.add_error("title", "Title may not be blank");
    } else if title.chars().count() > MAX_TITLE_LENGTH {
        errors.add_error("title", format!("Title may not exceed {} characters", MAX_TITLE_LENGTH));
    }
}

fn check_description(description: &str, errors: &mut ValidationError) {
    if description.trim().is_empty() {
        errors.add_error("description", "Description may not be blank");
    } else if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        errors.add_error(
            "description",
            format!("Description may not exceed {} characters", MAX_DESCRIPTION_LENGTH),
        );
    }
}

fn check_body(body: &str, errors: &mut ValidationError) {
    if body.trim().is_empty() {
        errors.add_error("body", "Body may not be blank");
    }
}

fn published_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArticleDetails {
    title: String,
    description: String,
    body: String,
    #[serde(default = "published_by_default")]
    is_published: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateArticle {
    article: ArticleDetails,
}

impl Validate for CreateArticle {
    fn validate(self) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::default();
        check_title(&self.article.title, &mut errors);
        check_description(&self.article.description, &mut errors);
        check_body(&self.article.body, &mut errors);
        errors.into_result(self)
    }
}

/// Fields an author may change; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArticleChanges {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    is_published: Option<bool>,
}

impl Validate for ArticleChanges {
    fn validate(self) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::default();
        if let Some(title) = &self.title {
            check_title(title, &mut errors);
        }
        if let Some(description) = &self.description {
            check_description(description, &mut errors);
        }
        if let Some(body) = &self.body {
            check_body(body, &mut errors);
        }
        errors.into_result(self)
    }
}

impl ArticleChanges {
    /// Merges the supplied fields over `article`. The slug is left alone.
    pub fn apply(self, article: &mut Article, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            article.title = title;
        }
        if let Some(description) = self.description {
            article.description = description;
        }
        if let Some(body) = self.body {
            article.body = body;
        }
        if let Some(is_published) = self.is_published {
            article.is_published = is_published;
        }
        article.read_time = read_time(&article.body);
        article.date_modified = now;
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateArticle {
    article: ArticleChanges,
}

#[get("/?<limit>&<offset>")]
pub async fn list(context: RequestContext, db: Db, limit: Option<i64>, offset: Option<i64>) -> ApiResult<Value> {
    let (limit, offset) = page(limit, offset);
    let viewer = context.user_id().unwrap_or(-1);

    let (articles, total) = db
        .run(move |conn| {
            let visible = articles::is_published.eq(true).or(articles::author_id.eq(viewer));
            let total = articles::table
                .filter(visible.clone())
                .count()
                .get_result::<i64>(conn)?;
            let rows = articles::table
                .inner_join(users::table)
                .filter(visible)
                .order(articles::date_created.desc())
                .limit(limit)
                .offset(offset)
                .select((articles::all_columns, users::username))
                .load::<(Article, String)>(conn)?;

            let ids: Vec<i32> = rows.iter().map(|(article, _)| article.id).collect();
            let counts = ReactionCounts::for_articles(&ids, conn)?;
            let articles: Vec<ArticleView> = rows
                .into_iter()
                .map(|(article, author)| {
                    let tally = counts.get(&article.id).copied().unwrap_or_default();
                    article.view(author, tally, None)
                })
                .collect();
            Ok((articles, total))
        })
        .await?;

    Ok(Json(json!({ "articles": articles, "count": total })))
}

/// Two authors racing for the same title both succeed; the loser of the
/// insert picks the next free suffix.
#[post("/", format = "json", data = "<create>")]
pub async fn create(user: User, db: Db, create: Json<CreateArticle>) -> Result<Custom<Json<Value>>, ApiError> {
    let details = create.validate()?.into_inner().article;
    let author_id = user.id;

    let article = db
        .run(move |conn| {
            let article = retry_on_conflict(conn, ARTICLES_SLUG_KEY, |conn| {
                let slug = unique_slug(&details.title, conn)?;
                diesel::insert_into(articles::table)
                    .values(&NewArticle {
                        author_id,
                        slug: &slug,
                        title: &details.title,
                        description: &details.description,
                        body: &details.body,
                        is_published: details.is_published,
                        read_time: read_time(&details.body),
                    })
                    .get_result::<Article>(conn)
            })?;
            Ok(article)
        })
        .await?;

    tracing::info!(user_id = user.id, slug = %article.slug, "article created");
    let view = article.view(user.username, ReactionCounts::default(), None);
    Ok(Custom(Status::Created, Json(json!({ "article": view }))))
}

#[get("/<slug>")]
pub async fn get(context: RequestContext, db: Db, slug: String) -> ApiResult<Value> {
    let viewer = context.user_id();
    let view = db
        .run(move |conn| {
            let article = Article::load_visible(&slug, viewer, conn)?;
            Ok(load_view(article, viewer, conn)?)
        })
        .await?;
    Ok(Json(json!({ "article": view })))
}

/// The body is read only once the caller is known to own the article.
#[put("/<slug>", data = "<update>")]
pub async fn update(user: User, db: Db, limits: &Limits, slug: String, update: Data<'_>) -> ApiResult<Value> {
    let mut article = db.run(move |conn| Article::load_by_slug(&slug, conn)).await?;
    ensure_owner(&article, &user, "You can only edit your own articles")?;

    let changes = read_payload::<UpdateArticle>(update, limits).await?.article.validate()?;
    changes.apply(&mut article, Utc::now());
    let viewer = user.id;
    let view = db
        .run(move |conn| {
            let article = diesel::update(&article).set(&article).get_result::<Article>(conn)?;
            Ok(load_view(article, Some(viewer), conn)?)
        })
        .await?;

    tracing::info!(user_id = user.id, slug = %view.slug, "article updated");
    Ok(Json(json!({ "article": view })))
}

#[delete("/<slug>")]
pub async fn delete(user: User, db: Db, slug: String) -> ApiResult<Value> {
    db.run(move |conn| {
        let article = Article::load_by_slug(&slug, conn)?;
        ensure_owner(&article, &user, "You can only delete your own articles")?;
        diesel::delete(&article).execute(conn)?;
        tracing::info!(user_id = user.id, slug = %article.slug, "article deleted");
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "message": "Article deleted successfully" })))
}

fn record_reaction(
    user: &User,
    connection: &mut PgConnection,
    slug: &str,
    polarity: Option<Polarity>,
) -> Result<ArticleView, ApiError> {
    let article = Article::load_visible(slug, Some(user.id), connection)?;
    match polarity {
        Some(polarity) => react(user.id, article.id, polarity, connection)?,
        None => {
            diesel::delete(
                reactions::table
                    .filter(reactions::user_id.eq(user.id))
                    .filter(reactions::article_id.eq(article.id)),
            )
            .execute(connection)?;
        }
    }
    tracing::debug!(user_id = user.id, article_id = article.id, ?polarity, "reaction recorded");
    Ok(load_view(article, Some(user.id), connection)?)
}

async fn reaction_response(user: User, db: Db, slug: String, polarity: Option<Polarity>) -> ApiResult<Value> {
    let view = db
        .run(move |conn| record_reaction(&user, conn, &slug, polarity))
        .await?;
    Ok(Json(json!({ "article": view })))
}

#[post("/<slug>/like")]
pub async fn like(user: User, db: Db, slug: String) -> ApiResult<Value> {
    reaction_response(user, db, slug, Some(Polarity::Like)).await
}

#[post("/<slug>/dislike")]
pub async fn dislike(user: User, db: Db, slug: String) -> ApiResult<Value> {
    reaction_response(user, db, slug, Some(Polarity::Dislike)).await
}

#[delete("/<slug>/reaction")]
pub async fn clear_reaction(user: User, db: Db, slug: String) -> ApiResult<Value> {
    reaction_response(user, db, slug, None).await
}

#[derive(Debug, Queryable, Serialize)]
pub struct ArticleImage {
    pub id: i32,
    #[serde(skip_serializing)]
    pub article_id: i32,
    pub image: String,
    #[serde(serialize_with = "serialize_date")]
    pub date_created: DateTime<Utc>,
}

#[derive(FromForm)]
pub struct ImageForm<'r> {
    file: Option<TempFile<'r>>,
}

impl<'r> ImageForm<'r> {
    pub fn file(&self) -> Option<&TempFile<'r>> {
        self.file.as_ref()
    }
}

#[post("/<slug>/image", data = "<form>")]
pub async fn upload_image(
    user: User,
    db: Db,
    host: &State<SharedImageHost>,
    slug: String,
    form: Form<ImageForm<'_>>,
) -> Result<Custom<Json<Value>>, ApiError> {
    let article = db.run(move |conn| Article::load_by_slug(&slug, conn)).await?;
    ensure_owner(&article, &user, "You can only add images to your own articles")?;

    let file = form.file().ok_or(media::UploadError::Missing)?;
    let url = media::upload(host.inner().as_ref(), file, ALLOWED_FORMATS).await?;

    let article_id = article.id;
    let image = db
        .run(move |conn| {
            Ok(diesel::insert_into(article_images::table)
                .values((article_images::article_id.eq(article_id), article_images::image.eq(&url)))
                .get_result::<ArticleImage>(conn)?)
        })
        .await?;

    tracing::info!(user_id = user.id, slug = %article.slug, "article image uploaded");
    Ok(Custom(
        Status::Created,
        Json(json!({ "message": "Image uploaded successfully", "image": image })),
    ))
}

#[get("/<slug>/image")]
pub async fn images(context: RequestContext, db: Db, slug: String) -> ApiResult<Value> {
    let viewer = context.user_id();
    let images = db
        .run(move |conn| {
            let article = Article::load_visible(&slug, viewer, conn)?;
            Ok(article_images::table
                .filter(article_images::article_id.eq(article.id))
                .order(article_images::date_created.asc())
                .load::<ArticleImage>(conn)?)
        })
        .await?;
    Ok(Json(json!({ "images": images })))
}

/// Platforms an article can be shared to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePlatform {
    Facebook,
    Twitter,
    Linkedin,
    Reddit,
    Email,
}

impl SharePlatform {
    pub const ALL: [SharePlatform; 5] = [
        SharePlatform::Facebook,
        SharePlatform::Twitter,
        SharePlatform::Linkedin,
        SharePlatform::Reddit,
        SharePlatform::Email,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SharePlatform::Facebook => "facebook",
            SharePlatform::Twitter => "twitter",
            SharePlatform::Linkedin => "linkedin",
            SharePlatform::Reddit => "reddit",
            SharePlatform::Email => "email",
        }
    }

    /// Link that opens the platform's share dialog for `url`.
    pub fn link(self, url: &str, title: &str) -> Option<String> {
        let (base, params) = match self {
            SharePlatform::Facebook => ("https://www.facebook.com/sharer/sharer.php", vec![("u", url)]),
            SharePlatform::Twitter => ("https://twitter.com/intent/tweet", vec![("text", title), ("url", url)]),
            SharePlatform::Linkedin => ("https://www.linkedin.com/sharing/share-offsite/", vec![("url", url)]),
            SharePlatform::Reddit => ("https://www.reddit.com/submit", vec![("url", url), ("title", title)]),
            SharePlatform::Email => ("mailto:", vec![("subject", title), ("body", url)]),
        };
        Url::parse_with_params(base, &params).ok().map(String::from)
    }
}

impl<'a> FromParam<'a> for SharePlatform {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        SharePlatform::ALL
            .into_iter()
            .find(|platform| platform.name() == param)
            .ok_or(param)
    }
}

/// Public URL of the article, as shared.
pub fn article_url(domain: &str, slug: &str) -> String {
    format!("{}/api/articles/{}", domain.trim_end_matches('/'), slug)
}

#[get("/<slug>/share/<provider>")]
pub async fn share(
    context: RequestContext,
    db: Db,
    settings: &State<Settings>,
    slug: String,
    provider: Result<SharePlatform, &str>,
) -> ApiResult<Value> {
    let platform = provider.map_err(|unknown| {
        let known = SharePlatform::ALL.map(SharePlatform::name).join(", ");
        ValidationError::from(
            "provider",
            format!("Cannot share to '{}'; choose one of {}", unknown, known),
        )
    })?;

    let viewer = context.user_id();
    let article = db.run(move |conn| Article::load_visible(&slug, viewer, conn)).await?;
    let url = article_url(&settings.domain, &article.slug);
    let link = platform.link(&url, &article.title).ok_or(ApiError::Internal)?;

    tracing::debug!(slug = %article.slug, provider = platform.name(), "share link built");
    Ok(Json(json!({
        "share": { "provider": platform, "article": article.slug, "link": link }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_payload;

    fn article(author_id: i32, is_published: bool) -> Article {
        let now = Utc::now();
        Article {
            id: 1,
            author_id,
            slug: "foo".into(),
            title: "Foo".into(),
            description: "About foo".into(),
            body: "one two three".into(),
            is_published,
            read_time: 1,
            date_created: now,
            date_modified: now,
        }
    }

    #[test]
    fn read_time_rounds_up_with_minimum() {
        assert_eq!(read_time(""), 1);
        assert_eq!(read_time("word"), 1);
        assert_eq!(read_time(&"word ".repeat(200)), 1);
        assert_eq!(read_time(&"word ".repeat(201)), 2);
        assert_eq!(read_time(&"word\n".repeat(1000)), 5);
    }

    #[test]
    fn slugs_come_from_titles() {
        assert_eq!(slug_base("Foo"), "foo");
        assert_eq!(slug_base("  Hello, World!  "), "hello-world");
        assert_eq!(slug_base("!!!"), "article");
    }

    #[test]
    fn counts_tally_by_polarity() {
        let counts = ReactionCounts::tally(vec![(1, 3), (0, 2), (7, 9)]);
        assert_eq!(counts, ReactionCounts { likes: 3, dislikes: 2 });
        assert_eq!(ReactionCounts::tally(Vec::new()), ReactionCounts::default());
    }

    #[test]
    fn polarity_storage_values() {
        assert_eq!(Polarity::Like.stored(), 1);
        assert_eq!(Polarity::Dislike.stored(), 0);
        assert_eq!(Polarity::from_stored(1), Some(Polarity::Like));
        assert_eq!(Polarity::from_stored(0), Some(Polarity::Dislike));
        assert_eq!(Polarity::from_stored(2), None);
        assert_eq!(serde_json::to_value(Polarity::Dislike).unwrap(), "dislike");
    }

    #[test]
    fn drafts_are_visible_only_to_author() {
        let draft = article(7, false);
        assert!(draft.visible_to(Some(7)));
        assert!(!draft.visible_to(Some(8)));
        assert!(!draft.visible_to(None));
        assert!(article(7, true).visible_to(None));
    }

    #[test]
    fn partial_update_merges_supplied_fields() {
        let mut stored = article(1, true);
        let created = stored.date_created;
        let later = created + chrono::Duration::seconds(5);
        let changes = ArticleChanges {
            title: Some("Foo, revised".into()),
            body: Some("word ".repeat(450)),
            ..Default::default()
        };
        changes.validate().unwrap().apply(&mut stored, later);

        assert_eq!(stored.title, "Foo, revised");
        assert_eq!(stored.slug, "foo");
        assert_eq!(stored.description, "About foo");
        assert_eq!(stored.read_time, 3);
        assert_eq!(stored.date_modified, later);
        assert_eq!(stored.date_created, created);
    }

    #[test]
    fn changes_validate_only_supplied_fields() {
        assert!(ArticleChanges::default().validate().is_ok());
        let err = ArticleChanges {
            title: Some("x".repeat(MAX_TITLE_LENGTH + 1)),
            description: Some(" ".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.messages("title").len(), 1);
        assert_eq!(err.messages("description").len(), 1);
        assert!(err.messages("body").is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let body = json!({ "article": { "title": "x", "slug": "hijack" } });
        assert!(parse_payload::<UpdateArticle>(&body.to_string()).is_err());
        let body = json!({ "article": { "title": "x", "description": "d", "body": "b", "author_id": 3 } });
        assert!(serde_json::from_value::<CreateArticle>(body).is_err());
    }

    #[test]
    fn create_defaults_to_published() {
        let body = json!({ "article": { "title": "Foo", "description": "d", "body": "b" } });
        let create: CreateArticle = serde_json::from_value(body).unwrap();
        assert!(create.article.is_published);
        assert!(create.validate().is_ok());
    }

    #[test]
    fn view_carries_counts_and_author() {
        let counts = ReactionCounts { likes: 0, dislikes: 1 };
        let view = article(1, true).view("alice".into(), counts, Some(Polarity::Dislike));
        let value = serde_json::to_value(view).unwrap();
        assert_eq!(value["author"], "alice");
        assert_eq!(value["like_count"], 0);
        assert_eq!(value["dislike_count"], 1);
        assert_eq!(value["reaction"], "dislike");
        assert!(value.get("author_id").is_none());
    }

    #[test]
    fn share_platforms_parse_from_path() {
        assert_eq!(SharePlatform::from_param("twitter"), Ok(SharePlatform::Twitter));
        assert_eq!(SharePlatform::from_param("email"), Ok(SharePlatform::Email));
        assert_eq!(SharePlatform::from_param("myspace"), Err("myspace"));
        assert_eq!(serde_json::to_value(SharePlatform::Linkedin).unwrap(), "linkedin");
    }

    #[test]
    fn share_links_encode_the_article() {
        let url = article_url("https://authors.example/", "hello-world");
        assert_eq!(url, "https://authors.example/api/articles/hello-world");

        let twitter = SharePlatform::Twitter.link(&url, "Hello & welcome").unwrap();
        assert_eq!(
            twitter,
            "https://twitter.com/intent/tweet?text=Hello+%26+welcome&url=https%3A%2F%2Fauthors.example%2Fapi%2Farticles%2Fhello-world"
        );
        let facebook = SharePlatform::Facebook.link(&url, "ignored").unwrap();
        assert!(facebook.starts_with("https://www.facebook.com/sharer/sharer.php?u=https%3A%2F%2F"));
        assert!(SharePlatform::Email.link(&url, "Hi").unwrap().starts_with("mailto:?subject=Hi&body="));
        for platform in SharePlatform::ALL {
            assert!(platform.link(&url, "t").is_some(), "{:?}", platform);
        }
    }
}
