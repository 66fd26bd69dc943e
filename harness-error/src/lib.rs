/// Which stage of a harness run a failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Missing or malformed configuration values.
    Config,
    /// The database or an API client could not be brought up.
    Initialization,
    /// A direct database statement failed.
    Query,
    /// Sign-up or the follow-up admin confirmation failed.
    Registration,
    /// The auth or data API answered with a non-success status.
    Api,
    /// A write reported success but reading it back disagreed.
    Consistency,
    /// Fixture removal or connection release failed.
    Teardown,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Initialization => "initialization",
            Self::Query => "query",
            Self::Registration => "registration",
            Self::Api => "api",
            Self::Consistency => "consistency",
            Self::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct HarnessError {
    kind: FailureKind,
    status: Option<u16>,
    message: String,
}

// Generates strings like "consistency failure: Email confirmation failed for user@example.com"
// or "api failure (422): User already registered"
impl std::fmt::Display for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} failure ({status}): {}", self.kind, self.message),
            None => write!(f, "{} failure: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for HarnessError {}

impl HarnessError {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn api<S: Into<String>>(status: u16, message: S) -> Self {
        Self {
            kind: FailureKind::Api,
            status: Some(status),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Finds the typed failure in an `anyhow` error, whether it is the root cause or was
    /// attached as context, looking through any further context layers.
    #[must_use]
    pub fn find(err: &anyhow::Error) -> Option<&HarnessError> {
        err.downcast_ref::<HarnessError>()
    }

    #[must_use]
    pub fn kind_of(err: &anyhow::Error) -> Option<FailureKind> {
        Self::find(err).map(HarnessError::kind)
    }
}

pub type Result<T> = anyhow::Result<T>;

#[macro_export]
macro_rules! config_failure {
        ($msg:literal $(,)?) => {
            $crate::bail!($crate::HarnessError::new(
                $crate::FailureKind::Config,
                format!($msg),
            ))
        };
        ($fmt:expr, $($arg:tt)*) => {
            $crate::bail!($crate::HarnessError::new(
                $crate::FailureKind::Config,
                format!($fmt, $($arg)*),
            ))
        };
    }

#[macro_export]
macro_rules! registration_failure {
        ($msg:literal $(,)?) => {
            $crate::bail!($crate::HarnessError::new(
                $crate::FailureKind::Registration,
                format!($msg),
            ))
        };
        ($fmt:expr, $($arg:tt)*) => {
            $crate::bail!($crate::HarnessError::new(
                $crate::FailureKind::Registration,
                format!($fmt, $($arg)*),
            ))
        };
    }

#[macro_export]
macro_rules! consistency_failure {
        ($msg:literal $(,)?) => {
            $crate::bail!($crate::HarnessError::new(
                $crate::FailureKind::Consistency,
                format!($msg),
            ))
        };
        ($fmt:expr, $($arg:tt)*) => {
            $crate::bail!($crate::HarnessError::new(
                $crate::FailureKind::Consistency,
                format!($fmt, $($arg)*),
            ))
        };
    }

pub mod anyhow {
    pub use anyhow::Context;
    pub use anyhow::Error;
    pub use anyhow::Ok;
    pub use anyhow::Result;
    pub use anyhow::anyhow;

    #[macro_export]
    macro_rules! bail {
        ($msg:literal $(,)?) => {
            return Err($crate::anyhow::anyhow!($msg).into())
        };
        ($err:expr $(,)?) => {
            return Err($crate::anyhow::anyhow!($err).into())
        };
        ($fmt:expr, $($arg:tt)*) => {
            return Err($crate::anyhow::anyhow!($fmt, $($arg)*).into())
        };
    }
    pub use bail;

    #[macro_export]
    macro_rules! ensure {
        ($cond:expr $(,)?) => {
            if !$cond {
                $crate::bail!(concat!("Condition failed: `", stringify!($cond), "`"))
            }
        };
        ($cond:expr, $msg:literal $(,)?) => {
            if !$cond {
                $crate::bail!($msg);
            }
        };
        ($cond:expr, $err:expr $(,)?) => {
            if !$cond {
                $crate::bail!($err);
            }
        };
        ($cond:expr, $fmt:expr, $($arg:tt)*) => {
            if !$cond {
                $crate::bail!($fmt, $($arg)*);
            }
        };
    }
    pub use ensure;
}
