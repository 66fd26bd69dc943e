use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::Profile;
use harness_error::anyhow;

/// Direct, policy-bypassing access to the identity and profile tables.
///
/// Abstracts the database connection so the fixture lifecycle can run against Postgres in
/// production and an in-memory store in tests.
#[async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    /// Id of the identity with exactly this email.
    async fn user_id_by_email(&self, email: &str) -> anyhow::Result<Option<Uuid>>;

    /// Stamps the confirmation timestamp with the current time. Returns the affected row count.
    async fn set_email_confirmed(&self, email: &str) -> anyhow::Result<u64>;

    /// `Ok(None)` both when the identity is missing and when it is unconfirmed.
    async fn email_confirmed_at(&self, email: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn user_ids_with_email_suffix(&self, suffix: &str) -> anyhow::Result<Vec<Uuid>>;

    async fn delete_profiles(&self, user_ids: &[Uuid]) -> anyhow::Result<u64>;

    async fn delete_users(&self, user_ids: &[Uuid]) -> anyhow::Result<u64>;

    async fn profiles_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Profile>>;

    /// Every profile row, ignoring row-level policies.
    async fn all_profiles(&self) -> anyhow::Result<Vec<Profile>>;

    /// Releases the held connection and closes the pool. Never fails; problems are logged.
    async fn shutdown(&self);
}
