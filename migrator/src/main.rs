#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    use anyhow::Context as _;

    rls_harness::logging::setup_logging();

    let database_url = std::env::var("DATABASE_URL").context("Missing DATABASE_URL env var")?;

    migrator::migrate_database(&database_url).await
}
