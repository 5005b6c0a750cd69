use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError, QueryResult};
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rocket::http::Status;
use rocket::request::{self, FromRequest, Outcome, Request};
use rocket::tokio::task;

use crate::config::Settings;
use crate::types::ApiError;

pub mod schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Unique constraints that handlers recover from. Postgres names an inline
/// `UNIQUE` column `<table>_<column>_key`.
pub const USERS_EMAIL_KEY: &str = "users_email_key";
pub const USERS_USERNAME_KEY: &str = "users_username_key";
pub const ARTICLES_SLUG_KEY: &str = "articles_slug_key";
pub const PROFILES_USER_ID_KEY: &str = "profiles_user_id_key";

const CONFLICT_RETRIES: usize = 5;

// An alias to the type for a pool of Diesel Postgres connections.
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

type PooledPg = PooledConnection<ConnectionManager<PgConnection>>;

error_chain! {
    foreign_links {
        R2D2(r2d2::PoolError);
        Diesel(DieselError);
    }
}

/// Handle to the managed pool. Queries run through `Db::run`, off the async
/// workers.
pub struct Db(Pool);

/// Fails with an `InternalServerError` status when no pool is managed.
/// Checkout happens later, inside `Db::run`.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for Db {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Db, ()> {
        match request.rocket().state::<Pool>() {
            Some(pool) => Outcome::Success(Db(pool.clone())),
            None => Outcome::Error((Status::InternalServerError, ())),
        }
    }
}

impl Db {
    pub async fn run<F, T>(&self, f: F) -> std::result::Result<T, ApiError>
    where
        F: FnOnce(&mut PgConnection) -> std::result::Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        run(&self.0, f).await
    }
}

fn checkout(pool: &Pool) -> std::result::Result<PooledPg, ApiError> {
    pool.get().map_err(|e| {
        tracing::error!(error = %e, "no database connection available");
        ApiError::Unavailable
    })
}

/// Checks out a connection and runs `f` with it on the blocking thread pool.
/// A pool that cannot hand out a connection yields `ApiError::Unavailable`.
pub async fn run<F, T>(pool: &Pool, f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce(&mut PgConnection) -> std::result::Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    task::spawn_blocking(move || {
        let mut conn = checkout(&pool)?;
        f(&mut conn)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "database task panicked");
        ApiError::Internal
    })?
}

/// Runs `attempt` in its own transaction (a savepoint when nested), again
/// each time it loses a race on `constraint`. Anything else is returned as is.
pub fn retry_on_conflict<T, F>(connection: &mut PgConnection, constraint: &str, mut attempt: F) -> QueryResult<T>
where
    F: FnMut(&mut PgConnection) -> QueryResult<T>,
{
    let mut retries = 0;
    loop {
        match connection.transaction::<T, DieselError, _>(|conn| attempt(conn)) {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info))
                if info.constraint_name() == Some(constraint) && retries < CONFLICT_RETRIES =>
            {
                retries += 1;
                tracing::debug!(constraint, retries, "unique constraint race lost; retrying");
            }
            result => return result,
        }
    }
}

/// Builds the pool without opening a connection; connections are made on
/// first checkout.
pub fn init_pool(settings: &Settings) -> Pool {
    let manager = ConnectionManager::<PgConnection>::new(settings.database_url.as_str());
    r2d2::Pool::builder()
        .max_size(settings.db_pool_size)
        .connection_timeout(settings.db_connect_timeout)
        .build_unchecked(manager)
}

pub fn run_migrations(pool: &Pool) -> Result<()> {
    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::from(format!("failed to run migrations: {}", e)))?;
    for version in applied {
        tracing::info!(%version, "applied migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn unreachable_pool() -> Pool {
        let mut settings = Settings::local("postgres://authors@127.0.0.1:1/authors_test", "secret");
        settings.db_connect_timeout = Duration::from_millis(200);
        init_pool(&settings)
    }

    #[rocket::async_test]
    async fn unreachable_database_is_unavailable() {
        let pool = unreachable_pool();
        let result = run(&pool, |_| Ok(1)).await;
        assert!(matches!(result, Err(ApiError::Unavailable)));
    }

    #[rocket::async_test]
    async fn checkout_waits_off_the_async_workers() {
        let pool = unreachable_pool();
        let started = Instant::now();
        let (result, ticked_after) = rocket::tokio::join!(run(&pool, |_| Ok(())), async {
            rocket::tokio::time::sleep(Duration::from_millis(20)).await;
            started.elapsed()
        });
        assert!(result.is_err());
        assert!(ticked_after < Duration::from_millis(150), "timer was starved for {:?}", ticked_after);
    }
}
