use tracing::{info, instrument};

use crate::{
    fixture::Harness,
    identity::{Profile, Role},
};
use harness_error::{anyhow, bail, ensure};

/// Table holding one profile row per identity, exposed through the data API.
pub const PROFILE_TABLE: &str = "users";

/// A signed-in user reads only its own profile row; filtering to anyone else's id yields
/// nothing.
///
/// # Errors
///
/// Will return `Err` if a fixture identity is missing, a request fails, or another user's row is
/// visible.
#[instrument(err, skip_all)]
pub async fn users_can_only_view_their_own_data(harness: &Harness) -> anyhow::Result<()> {
    let users = harness.users();

    let user_id = users.user_id_by_email(&Role::User.email()).await?;
    let test_user_id = users.user_id_by_email(&Role::Test.email()).await?;
    let admin_id = users.user_id_by_email(&Role::Admin.email()).await?;

    let (Some(user_id), Some(test_user_id), Some(admin_id)) = (user_id, test_user_id, admin_id)
    else {
        bail!("User not found");
    };

    ensure!(
        user_id != test_user_id,
        "user and test identities share id {user_id}"
    );

    let (user_client, logged_in_user_id) = users.login(Role::User).await?;

    ensure!(
        logged_in_user_id == user_id,
        "signed in as {logged_in_user_id}, expected {user_id}"
    );

    let own: Vec<Profile> = user_client
        .table(PROFILE_TABLE)
        .select("*")
        .eq("auth_user_id", logged_in_user_id)
        .fetch()
        .await?;

    ensure!(
        own.iter().all(|profile| profile.auth_user_id == logged_in_user_id),
        "filtered read returned rows of other users: {own:?}"
    );
    ensure!(
        own.len() == 1,
        "expected exactly one own profile row, found {}",
        own.len()
    );

    for other_id in [test_user_id, admin_id] {
        let other: Vec<Profile> = user_client
            .table(PROFILE_TABLE)
            .select("*")
            .eq("auth_user_id", other_id)
            .fetch()
            .await?;

        ensure!(
            other.is_empty(),
            "user {logged_in_user_id} can see {} profile rows of {other_id}",
            other.len()
        );
    }

    let unfiltered: Vec<Profile> = user_client.table(PROFILE_TABLE).select("*").fetch().await?;

    ensure!(
        unfiltered
            .iter()
            .all(|profile| profile.auth_user_id == logged_in_user_id),
        "unfiltered read leaked rows of other users: {unfiltered:?}"
    );

    Ok(())
}

/// The service client sees exactly as many profile rows as an unrestricted database read.
///
/// # Errors
///
/// Will return `Err` if either read fails or the counts differ.
#[instrument(err, skip_all)]
pub async fn service_role_can_view_all_users(harness: &Harness) -> anyhow::Result<()> {
    let (db_rows, api_rows) = tokio::try_join!(
        harness.store().all_profiles(),
        harness
            .service()
            .table(PROFILE_TABLE)
            .select("*")
            .fetch::<Profile>(),
    )?;

    info!(
        db_rows = db_rows.len(),
        api_rows = api_rows.len(),
        "Compared profile row counts"
    );

    ensure!(
        api_rows.len() == db_rows.len(),
        "service client sees {} profile rows, database has {}",
        api_rows.len(),
        db_rows.len()
    );

    Ok(())
}

/// The test identity exists (registering it when needed) and owns exactly one profile row.
///
/// # Errors
///
/// Will return `Err` if registration fails or the profile row count is not one.
#[instrument(err, skip_all)]
pub async fn can_self_register(harness: &Harness) -> anyhow::Result<()> {
    let users = harness.users();
    let email = Role::Test.email();

    let mut user_id = users.user_id_by_email(&email).await?;

    if user_id.is_none() {
        users.register(&email, users.password()).await?;
        user_id = users.user_id_by_email(&email).await?;
    }

    let Some(user_id) = user_id else {
        bail!("{email} still missing after registration");
    };

    let profiles = harness.store().profiles_for_user(user_id).await?;

    ensure!(
        profiles.len() == 1,
        "expected exactly one profile row for {email}, found {}",
        profiles.len()
    );
    ensure!(
        profiles[0].auth_user_id == user_id,
        "profile row belongs to {}, expected {user_id}",
        profiles[0].auth_user_id
    );

    Ok(())
}

/// The suite's cases, grouped the way they are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Case {
    UsersCanOnlyViewTheirOwnData,
    ServiceRoleCanViewAllUsers,
    CanSelfRegister,
}

impl Case {
    pub const ALL: [Case; 3] = [
        Case::UsersCanOnlyViewTheirOwnData,
        Case::ServiceRoleCanViewAllUsers,
        Case::CanSelfRegister,
    ];

    #[must_use]
    pub fn group(self) -> &'static str {
        match self {
            Case::UsersCanOnlyViewTheirOwnData | Case::ServiceRoleCanViewAllUsers => "users",
            Case::CanSelfRegister => "registration",
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Case::UsersCanOnlyViewTheirOwnData => "users can only view their own data",
            Case::ServiceRoleCanViewAllUsers => "should allow super admins to view all users",
            Case::CanSelfRegister => "can self register",
        }
    }

    /// # Errors
    ///
    /// Will return `Err` if the case's assertions fail.
    pub async fn run(self, harness: &Harness) -> anyhow::Result<()> {
        match self {
            Case::UsersCanOnlyViewTheirOwnData => users_can_only_view_their_own_data(harness).await,
            Case::ServiceRoleCanViewAllUsers => service_role_can_view_all_users(harness).await,
            Case::CanSelfRegister => can_self_register(harness).await,
        }
    }
}

impl std::fmt::Display for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} > {}", self.group(), self.name())
    }
}
