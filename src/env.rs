use harness_error::{FailureKind, HarnessError, anyhow};

pub const DEFAULT_TEST_PASSWORD: &str = "asdfasdf";

/// Connection settings for one harness run.
///
/// Built explicitly and handed to [`crate::connections::Connections`], so tests can point a run at
/// any backend without touching the process environment.
#[derive(Clone)]
pub struct Env {
    supabase_url: String,
    supabase_anon_key: String,
    supabase_service_key: String,
    database_url: String,
    test_password: String,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_anon_key", &"<redacted>")
            .field("supabase_service_key", &"<redacted>")
            .field("database_url", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Env {
    /// Reads the settings from the process environment.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a required variable is missing, empty or not valid unicode.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|var| match std::env::var(var) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(HarnessError::new(
                FailureKind::Config,
                format!("Invalid {var} env var: {err:?}"),
            )
            .into()),
        })
    }

    /// Reads the settings through `lookup`, treating empty values as unset.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `lookup` fails or a required variable is missing.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> anyhow::Result<Option<String>>,
    {
        let non_empty = |var: &str| -> anyhow::Result<Option<String>> {
            Ok(lookup(var)?.filter(|value| !value.is_empty()))
        };

        let required = |var: &str| -> anyhow::Result<String> {
            match non_empty(var)? {
                Some(value) => Ok(value),
                None => harness_error::config_failure!("Missing {var} env var"),
            }
        };

        let supabase_url = required("SUPABASE_URL")?;
        if !(supabase_url.starts_with("http://") || supabase_url.starts_with("https://")) {
            harness_error::config_failure!(
                "SUPABASE_URL must be an http(s) URL, got {supabase_url:?}"
            );
        }

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key: required("SUPABASE_ANON_KEY")?,
            supabase_service_key: required("SUPABASE_SERVICE_KEY")?,
            database_url: required("DATABASE_URL")?,
            test_password: non_empty("TEST_USER_PASSWORD")?
                .unwrap_or_else(|| DEFAULT_TEST_PASSWORD.to_string()),
        })
    }

    #[must_use]
    pub fn supabase_url(&self) -> &str {
        self.supabase_url.as_str()
    }

    #[must_use]
    pub fn supabase_anon_key(&self) -> &str {
        self.supabase_anon_key.as_str()
    }

    #[must_use]
    pub fn supabase_service_key(&self) -> &str {
        self.supabase_service_key.as_str()
    }

    #[must_use]
    pub fn database_url(&self) -> &str {
        self.database_url.as_str()
    }

    #[must_use]
    pub fn test_password(&self) -> &str {
        self.test_password.as_str()
    }
}
