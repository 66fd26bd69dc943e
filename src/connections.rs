use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::{api::ApiClient, db::Database, env::Env, store::IdentityStore};
use harness_error::{
    FailureKind, HarnessError,
    anyhow::{self, Context as _},
};

/// Everything a run talks to: the database, opened on first use, and the anonymous and
/// service API clients.
///
/// One provider is created per run and shut down once at the end; it is never shared through
/// process-global state.
#[derive(Debug)]
pub struct Connections {
    database_url: String,
    database: OnceCell<Arc<Database>>,
    anon: ApiClient,
    service: ApiClient,
}

impl Connections {
    /// Builds both API clients. The database is not contacted until [`Connections::database`].
    ///
    /// # Errors
    ///
    /// Will return an `Initialization` failure if the HTTP client cannot be built.
    pub fn new(env: &Env) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                anyhow::Error::new(err).context(HarnessError::new(
                    FailureKind::Initialization,
                    "Failed to build HTTP client",
                ))
            })?;

        Ok(Self {
            database_url: env.database_url().to_string(),
            database: OnceCell::new(),
            anon: ApiClient::new(http.clone(), env.supabase_url(), env.supabase_anon_key()),
            service: ApiClient::new(http, env.supabase_url(), env.supabase_service_key()),
        })
    }

    /// The run's database handle, connecting on the first call.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the first connection attempt fails. A later call tries again.
    #[instrument(err, skip(self))]
    pub async fn database(&self) -> anyhow::Result<Arc<Database>> {
        Ok(self
            .database
            .get_or_try_init(|| async {
                let db = Database::connect(&self.database_url)
                    .await
                    .context("Failed to initialize database client")?;

                info!("Database client initialized");

                anyhow::Ok(Arc::new(db))
            })
            .await?
            .clone())
    }

    /// Client with anonymous privileges: sign-up, password login, policy-scoped reads.
    #[must_use]
    pub fn anon(&self) -> &ApiClient {
        &self.anon
    }

    /// Client with service privileges: admin user updates, unrestricted reads.
    #[must_use]
    pub fn service(&self) -> &ApiClient {
        &self.service
    }

    /// Releases the database if it was ever opened; otherwise does nothing.
    pub async fn shutdown(&self) {
        match self.database.get() {
            Some(db) => db.shutdown().await,
            None => debug!("Database was never initialized, nothing to shut down"),
        }
    }
}
