use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    api::{AdminUserAttributes, ApiClient},
    identity::Role,
    store::IdentityStore,
};
use harness_error::{
    FailureKind, HarnessError,
    anyhow::{self, Context as _},
};

/// Checks that `email` has a confirmation timestamp right now.
///
/// Called after every confirmation write so a statement that silently matched nothing fails
/// the run instead of surfacing later as a login error.
///
/// # Errors
///
/// Will return a `Consistency` failure if the timestamp is unset or the identity is missing.
pub async fn ensure_email_confirmed(store: &dyn IdentityStore, email: &str) -> anyhow::Result<()> {
    if store.email_confirmed_at(email).await?.is_none() {
        harness_error::consistency_failure!("Email confirmation failed for {email}");
    }

    Ok(())
}

/// Creates, confirms and signs in the fixture identities.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn IdentityStore>,
    anon: ApiClient,
    service: ApiClient,
    password: String,
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService")
            .field("anon", &self.anon)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl UserService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        anon: ApiClient,
        service: ApiClient,
        password: impl Into<String>,
    ) -> Self {
        Self {
            store,
            anon,
            service,
            password: password.into(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn anon(&self) -> &ApiClient {
        &self.anon
    }

    #[must_use]
    pub fn service(&self) -> &ApiClient {
        &self.service
    }

    #[must_use]
    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    /// # Errors
    ///
    /// Will return a `Query` failure if the lookup fails.
    pub async fn user_id_by_email(&self, email: &str) -> anyhow::Result<Option<Uuid>> {
        self.store.user_id_by_email(email).await
    }

    /// Marks the email confirmed directly in storage, bypassing the verification flow, then
    /// reads the timestamp back.
    ///
    /// # Errors
    ///
    /// Will return `Err` if either statement fails, or a `Consistency` failure if the timestamp
    /// is still unset afterwards.
    #[instrument(err, skip(self))]
    pub async fn confirm_user_email(&self, email: &str) -> anyhow::Result<()> {
        let updated = self.store.set_email_confirmed(email).await?;

        info!(updated, "Set email confirmation timestamp");

        ensure_email_confirmed(self.store.as_ref(), email).await
    }

    /// Signs up through the anonymous client, then confirms the new identity through the admin
    /// API. Does not check whether `email` already exists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if sign-up or confirmation is rejected.
    #[instrument(err, skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> anyhow::Result<Uuid> {
        let user_id = self
            .anon
            .sign_up(email, password)
            .await
            .map_err(|err| {
                err.context(HarnessError::new(
                    FailureKind::Registration,
                    format!("Sign-up failed for {email}"),
                ))
            })?
            .user()
            .id;

        self.service
            .admin_update_user_by_id(
                user_id,
                &AdminUserAttributes {
                    email_confirm: Some(true),
                },
            )
            .await
            .map_err(|err| {
                err.context(HarnessError::new(
                    FailureKind::Registration,
                    format!("Admin confirmation failed for {email}"),
                ))
            })?;

        info!(%user_id, "Registered user");

        Ok(user_id)
    }

    /// Re-confirms the role's email, signs in with the test password and returns a client
    /// scoped to the new session along with the signed-in identity's id.
    ///
    /// # Errors
    ///
    /// Will return `Err` if confirmation or sign-in fails.
    #[instrument(err, skip(self))]
    pub async fn login(&self, role: Role) -> anyhow::Result<(ApiClient, Uuid)> {
        let email = role.email();

        self.confirm_user_email(&email).await?;

        let session = self
            .anon
            .sign_in_with_password(&email, &self.password)
            .await
            .with_context(|| format!("Failed to sign in as {email}"))?;

        let user_client = self.anon.with_access_token(&session.access_token);

        info!(user_id = %session.user.id, "Signed in");

        Ok((user_client, session.user.id))
    }
}
