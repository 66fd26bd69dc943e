use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TEST_EMAIL_DOMAIN: &str = "@example.com";

/// The fixed test identities, one per role, each with the address `<role>@example.com`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Admin,
    Test,
}

impl Role {
    /// Seeding order.
    pub const ALL: [Role; 3] = [Role::User, Role::Admin, Role::Test];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Test => "test",
        }
    }

    #[must_use]
    pub fn email(self) -> String {
        format!("{}{TEST_EMAIL_DOMAIN}", self.as_str())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "test" => Ok(Role::Test),
            other => Err(format!("unknown role {other:?}, expected user, admin or test")),
        }
    }
}

/// Emails of every fixture identity, in seeding order.
#[must_use]
pub fn fixture_emails() -> Vec<String> {
    Role::ALL.iter().map(|role| role.email()).collect()
}

/// A user record as returned by the auth API.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

/// A signed-in identity and the bearer token for its scoped client.
#[derive(Clone, Deserialize, Serialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Row of `public.users`, one per identity.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub auth_user_id: Uuid,
}
