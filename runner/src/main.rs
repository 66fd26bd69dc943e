use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use rls_harness::{Connections, Env, Harness, Role, clean_database, logging::setup_logging};
use tracing::info;

/// Seeds, verifies and cleans up the row-level-security test fixture.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensure the test identities exist and are confirmed, leaving them in place
    Seed,

    /// Remove every test identity and its profile row
    Clean,

    /// Seed, run every case, then clean up
    Verify,

    /// Install the profile table, sign-up trigger and row-level policies
    Migrate,

    /// Sign in as a test identity and print its id
    Login {
        /// One of user, admin or test
        role: Role,
    },
}

async fn run(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Migrate => {
            let database_url =
                std::env::var("DATABASE_URL").context("Missing DATABASE_URL env var")?;
            migrator::migrate_database(&database_url).await?;
        }
        Command::Seed => {
            let env = Env::from_env()?;
            let harness = Harness::connect(&env).await?;
            let seeded = harness.seed().await;
            harness.close().await;
            seeded?;
        }
        Command::Clean => {
            let env = Env::from_env()?;
            let connections = Connections::new(&env)?;
            let cleaned = match connections.database().await {
                Ok(db) => clean_database(db.as_ref()).await,
                Err(err) => Err(err),
            };
            connections.shutdown().await;
            let summary = cleaned?;
            println!(
                "removed {} users and {} profile rows",
                summary.users, summary.profiles
            );
        }
        Command::Verify => {
            let env = Env::from_env()?;
            let report = rls_harness::run(&env).await?;
            println!("{report}");
            if !report.passed() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Login { role } => {
            let env = Env::from_env()?;
            let harness = Harness::connect(&env).await?;
            let logged_in = harness.users().login(role).await;
            harness.close().await;
            let (_, user_id) = logged_in?;
            println!("{role}: {user_id}");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> anyhow::Result<ExitCode> {
    // A missing .env file is fine; variables may come from the environment itself
    let _ = dotenvy::dotenv();

    setup_logging();

    let cli = Cli::parse();

    let code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(run(cli.command))?;

    info!("Done");

    Ok(code)
}
