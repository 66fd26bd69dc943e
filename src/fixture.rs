use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::{
    api::ApiClient,
    connections::Connections,
    env::Env,
    identity::{TEST_EMAIL_DOMAIN, fixture_emails},
    store::IdentityStore,
    users::UserService,
};
use harness_error::{
    FailureKind, HarnessError,
    anyhow::{self, Context as _},
};

/// Makes every email in `emails` an existing, confirmed identity.
///
/// Missing identities are registered; every identity is re-confirmed, including ones that
/// already existed. Stops at the first failure.
///
/// # Errors
///
/// Will return `Err` naming the email that could not be ensured.
#[instrument(err, skip(users))]
pub async fn seed_database(users: &UserService, emails: &[String]) -> anyhow::Result<()> {
    for email in emails {
        let ensured = async {
            if users.user_id_by_email(email).await?.is_none() {
                users.register(email, users.password()).await?;
            }

            users.confirm_user_email(email).await
        }
        .await;

        if let Err(err) = ensured {
            error!(%email, "Failed to ensure user: {err:#}");
            return Err(err.context(format!("Failed to ensure user {email}")));
        }
    }

    info!(users = emails.len(), "Seeded users");

    Ok(())
}

/// Counts of rows removed by [`clean_database`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub profiles: u64,
    pub users: u64,
}

/// Deletes every identity whose email ends in the test domain, profile rows first.
///
/// # Errors
///
/// Will return `Err` if any statement fails.
#[instrument(err, skip(store))]
pub async fn clean_database(store: &dyn IdentityStore) -> anyhow::Result<CleanupSummary> {
    let user_ids = store.user_ids_with_email_suffix(TEST_EMAIL_DOMAIN).await?;

    let profiles = store.delete_profiles(&user_ids).await?;
    let users = store.delete_users(&user_ids).await?;

    let summary = CleanupSummary { profiles, users };

    info!(?summary, "Removed test users");

    Ok(summary)
}

/// A connected, seeded fixture and the handles the cases use.
///
/// Create with [`Harness::setup`] (or [`Harness::new`] followed by [`Harness::seed`]) and always
/// finish with [`Harness::teardown`].
#[derive(Clone, Debug)]
pub struct Harness {
    users: UserService,
}

impl Harness {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        anon: ApiClient,
        service: ApiClient,
        password: impl Into<String>,
    ) -> Self {
        Self {
            users: UserService::new(store, anon, service, password),
        }
    }

    /// Opens the run's connections without seeding.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the clients cannot be built or the database is unreachable.
    #[instrument(err, skip_all)]
    pub async fn connect(env: &Env) -> anyhow::Result<Self> {
        let connections = Connections::new(env)?;
        let db = connections.database().await?;

        Ok(Self::new(
            db,
            connections.anon().clone(),
            connections.service().clone(),
            env.test_password(),
        ))
    }

    /// Connects and seeds the fixture identities. The suite-level setup hook.
    ///
    /// # Errors
    ///
    /// Will return `Err` if connecting or seeding fails. A harness that connected but failed to
    /// seed is torn down before returning, so partially seeded identities do not linger.
    pub async fn setup(env: &Env) -> anyhow::Result<Self> {
        Self::connect(env).await?.seeded().await
    }

    /// Seeds `self`, tearing it down instead when seeding fails.
    ///
    /// # Errors
    ///
    /// Will return the seeding error; a teardown error at that point is only logged.
    pub async fn seeded(self) -> anyhow::Result<Self> {
        let seeded = self.seed().await;

        if let Err(err) = seeded {
            if let Err(teardown_err) = self.teardown().await {
                error!("Teardown after failed setup also failed: {teardown_err:#}");
            }
            return Err(err);
        }

        Ok(self)
    }

    /// # Errors
    ///
    /// Will return `Err` if any fixture identity cannot be ensured.
    pub async fn seed(&self) -> anyhow::Result<()> {
        seed_database(&self.users, &fixture_emails()).await
    }

    #[must_use]
    pub fn users(&self) -> &UserService {
        &self.users
    }

    #[must_use]
    pub fn store(&self) -> &dyn IdentityStore {
        self.users.store()
    }

    #[must_use]
    pub fn service(&self) -> &ApiClient {
        self.users.service()
    }

    /// Shuts the connection down and leaves the fixture in place.
    pub async fn close(self) {
        self.store().shutdown().await;
    }

    /// Removes the fixture, then shuts the connection down. The suite-level teardown hook.
    ///
    /// Shutdown runs even when cleanup fails.
    ///
    /// # Errors
    ///
    /// Will return a `Teardown` failure wrapping the cleanup error, after shutdown has run.
    pub async fn teardown(self) -> anyhow::Result<CleanupSummary> {
        let cleaned = clean_database(self.store()).await;

        if let Err(err) = &cleaned {
            error!("Error cleaning up test users: {err:#}");
        }

        self.store().shutdown().await;

        cleaned.context(HarnessError::new(
            FailureKind::Teardown,
            "Failed to remove test users",
        ))
    }
}
