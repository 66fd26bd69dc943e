mod db;

pub mod api;
pub mod connections;
pub mod env;
pub mod fixture;
pub mod identity;
pub mod logging;
pub mod scenarios;
pub mod store;
pub mod suite;
pub mod users;

pub use api::ApiClient;
pub use connections::Connections;
pub use db::Database;
pub use env::Env;
pub use fixture::{CleanupSummary, Harness, clean_database, seed_database};
pub use identity::{Profile, Role, TEST_EMAIL_DOMAIN};
pub use store::IdentityStore;
pub use suite::{SuiteReport, run};
pub use users::{UserService, ensure_email_confirmed};

pub use harness_error::{FailureKind, HarnessError};
