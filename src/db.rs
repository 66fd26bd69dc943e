use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Connection as _, PgPool, Postgres,
    pool::PoolConnection,
    postgres::PgPoolOptions,
};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{identity::Profile, store::IdentityStore};
use harness_error::{
    FailureKind, HarnessError,
    anyhow::{self, anyhow},
};

// Attaches a `Query` failure kind to driver errors while keeping the driver error as the cause.
trait QueryContext<T> {
    fn query_context<F>(self, what: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> QueryContext<T> for Result<T, sqlx::Error> {
    fn query_context<F>(self, what: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| {
            anyhow::Error::new(err).context(HarnessError::new(FailureKind::Query, what()))
        })
    }
}

/// `LIKE` pattern matching any string ending in `suffix` literally.
pub(crate) fn like_suffix_pattern(suffix: &str) -> String {
    let mut pattern = String::with_capacity(suffix.len() + 1);
    pattern.push('%');
    for c in suffix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern
}

/// One pool and the single connection this process holds on it for the whole run.
pub struct Database {
    pool: PgPool,
    client: Mutex<Option<PoolConnection<Postgres>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool_size", &self.pool.size())
            .field("closed", &self.pool.is_closed())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens the pool and acquires the held connection.
    ///
    /// # Errors
    ///
    /// Will return an `Initialization` failure if the URL is invalid or no connection can be
    /// established.
    #[instrument(err, skip_all)]
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)
            .map_err(|err| {
                anyhow::Error::new(err).context(HarnessError::new(
                    FailureKind::Initialization,
                    "Invalid DATABASE_URL",
                ))
            })?;

        let db = Self {
            pool,
            client: Mutex::new(None),
        };

        drop(db.client().await?);

        Ok(db)
    }

    /// Whether [`IdentityStore::shutdown`] has closed the pool.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// The held connection, acquired on first use and reused afterwards.
    async fn client(&self) -> anyhow::Result<MappedMutexGuard<'_, PoolConnection<Postgres>>> {
        let mut client = self.client.lock().await;

        if client.is_none() {
            let conn = self.pool.acquire().await.map_err(|err| {
                anyhow::Error::new(err).context(HarnessError::new(
                    FailureKind::Initialization,
                    "Failed to acquire database client",
                ))
            })?;

            info!("Acquired database client");

            *client = Some(conn);
        }

        MutexGuard::try_map(client, Option::as_mut)
            .map_err(|_| anyhow!("Database client is not initialized"))
    }
}

#[async_trait]
impl IdentityStore for Database {
    #[instrument(err, skip(self))]
    async fn user_id_by_email(&self, email: &str) -> anyhow::Result<Option<Uuid>> {
        let mut client = self.client().await?;

        sqlx::query_scalar::<_, Uuid>("SELECT id FROM auth.users WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut **client)
            .await
            .query_context(|| format!("Error fetching user by email: {email}"))
    }

    #[instrument(err, skip(self))]
    async fn set_email_confirmed(&self, email: &str) -> anyhow::Result<u64> {
        let mut client = self.client().await?;

        Ok(
            sqlx::query("UPDATE auth.users SET email_confirmed_at = now() WHERE email = $1")
                .bind(email)
                .execute(&mut **client)
                .await
                .query_context(|| format!("Failed to set email_confirmed_at for {email}"))?
                .rows_affected(),
        )
    }

    #[instrument(err, skip(self))]
    async fn email_confirmed_at(&self, email: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let mut client = self.client().await?;

        Ok(sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT email_confirmed_at FROM auth.users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&mut **client)
        .await
        .query_context(|| format!("Failed to read email_confirmed_at for {email}"))?
        .flatten())
    }

    #[instrument(err, skip(self))]
    async fn user_ids_with_email_suffix(&self, suffix: &str) -> anyhow::Result<Vec<Uuid>> {
        let mut client = self.client().await?;

        sqlx::query_scalar::<_, Uuid>("SELECT id FROM auth.users WHERE email LIKE $1")
            .bind(like_suffix_pattern(suffix))
            .fetch_all(&mut **client)
            .await
            .query_context(|| format!("Failed to list users with email suffix {suffix}"))
    }

    #[instrument(err, skip(self))]
    async fn delete_profiles(&self, user_ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut client = self.client().await?;

        Ok(
            sqlx::query("DELETE FROM public.users WHERE auth_user_id = ANY($1)")
                .bind(user_ids)
                .execute(&mut **client)
                .await
                .query_context(|| "Failed to delete profile rows".to_string())?
                .rows_affected(),
        )
    }

    #[instrument(err, skip(self))]
    async fn delete_users(&self, user_ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut client = self.client().await?;

        Ok(sqlx::query("DELETE FROM auth.users WHERE id = ANY($1)")
            .bind(user_ids)
            .execute(&mut **client)
            .await
            .query_context(|| "Failed to delete users".to_string())?
            .rows_affected())
    }

    #[instrument(err, skip(self))]
    async fn profiles_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Profile>> {
        let mut client = self.client().await?;

        sqlx::query_as::<_, Profile>(
            "SELECT id, auth_user_id FROM public.users WHERE auth_user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut **client)
        .await
        .query_context(|| format!("Failed to read profile rows for user {user_id}"))
    }

    #[instrument(err, skip(self))]
    async fn all_profiles(&self) -> anyhow::Result<Vec<Profile>> {
        let mut client = self.client().await?;

        sqlx::query_as::<_, Profile>("SELECT id, auth_user_id FROM public.users")
            .fetch_all(&mut **client)
            .await
            .query_context(|| "Failed to read profile rows".to_string())
    }

    async fn shutdown(&self) {
        let client = self.client.lock().await.take();

        if let Some(client) = client {
            match client.detach().close().await {
                Ok(()) => info!("Released database client"),
                Err(err) => error!(?err, "Error releasing DB client"),
            }
        }

        self.pool.close().await;

        info!("Closed database pool");
    }
}
