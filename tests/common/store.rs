// In-memory IdentityStore over the mock backend's tables
//
// Stands in for the direct Postgres connection, so seeding, confirmation checks and cleanup see
// the same rows the mock APIs serve. Deleting an identity that still has a profile row fails
// the way the foreign key would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harness_error::anyhow;
use rls_harness::{FailureKind, HarnessError, IdentityStore, Profile};
use uuid::Uuid;

use super::backend::{SharedState, lock};

pub struct MemoryStore {
    state: SharedState,
}

impl MemoryStore {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn user_id_by_email(&self, email: &str) -> anyhow::Result<Option<Uuid>> {
        Ok(lock(&self.state).user(email).map(|user| user.id))
    }

    async fn set_email_confirmed(&self, email: &str) -> anyhow::Result<u64> {
        let mut state = lock(&self.state);
        let ignore = state.ignore_confirmations;

        let mut updated = 0;
        for user in state.users.iter_mut().filter(|user| user.email == email) {
            if !ignore {
                user.email_confirmed_at = Some(Utc::now());
            }
            updated += 1;
        }

        Ok(updated)
    }

    async fn email_confirmed_at(&self, email: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(lock(&self.state)
            .user(email)
            .and_then(|user| user.email_confirmed_at))
    }

    async fn user_ids_with_email_suffix(&self, suffix: &str) -> anyhow::Result<Vec<Uuid>> {
        Ok(lock(&self.state)
            .users
            .iter()
            .filter(|user| user.email.ends_with(suffix))
            .map(|user| user.id)
            .collect())
    }

    async fn delete_profiles(&self, user_ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut state = lock(&self.state);

        if state.fail_profile_deletes {
            return Err(HarnessError::new(
                FailureKind::Query,
                "Failed to delete profile rows: permission denied for table users",
            )
            .into());
        }

        let before = state.profiles.len();
        state
            .profiles
            .retain(|profile| !user_ids.contains(&profile.auth_user_id));

        Ok((before - state.profiles.len()) as u64)
    }

    async fn delete_users(&self, user_ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut state = lock(&self.state);

        if let Some(profile) = state
            .profiles
            .iter()
            .find(|profile| user_ids.contains(&profile.auth_user_id))
        {
            return Err(HarnessError::new(
                FailureKind::Query,
                format!(
                    "update or delete on table \"users\" violates foreign key constraint \"users_auth_user_id_fkey\" on table \"users\": key (id)=({}) is still referenced",
                    profile.auth_user_id
                ),
            )
            .into());
        }

        let before = state.users.len();
        state.users.retain(|user| !user_ids.contains(&user.id));

        Ok((before - state.users.len()) as u64)
    }

    async fn profiles_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Profile>> {
        Ok(lock(&self.state)
            .profiles
            .iter()
            .filter(|profile| profile.auth_user_id == user_id)
            .cloned()
            .collect())
    }

    async fn all_profiles(&self) -> anyhow::Result<Vec<Profile>> {
        Ok(lock(&self.state).profiles.clone())
    }

    async fn shutdown(&self) {
        lock(&self.state).shutdowns += 1;
    }
}
