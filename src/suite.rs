use tracing::{error, info, instrument};

use crate::{
    env::Env,
    fixture::{CleanupSummary, Harness},
    scenarios::Case,
};
use harness_error::anyhow;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    /// Setup failed before the case could start.
    NotRun,
}

#[derive(Clone, Debug)]
pub struct CaseReport {
    pub case: Case,
    pub outcome: Outcome,
}

/// Result of one suite run: the setup hook, each case, and the teardown hook.
#[derive(Clone, Debug, Default)]
pub struct SuiteReport {
    pub setup_error: Option<String>,
    pub cases: Vec<CaseReport>,
    pub cleanup: Option<CleanupSummary>,
    pub teardown_error: Option<String>,
}

impl SuiteReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.setup_error.is_none()
            && self.teardown_error.is_none()
            && self
                .cases
                .iter()
                .all(|report| report.outcome == Outcome::Passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases
            .iter()
            .filter(|report| matches!(report.outcome, Outcome::Failed(_)))
    }

    fn record_teardown(&mut self, result: anyhow::Result<CleanupSummary>) {
        match result {
            Ok(cleanup) => self.cleanup = Some(cleanup),
            Err(err) => self.teardown_error = Some(format!("{err:#}")),
        }
    }

    #[must_use]
    pub fn outcome(&self, case: Case) -> Option<&Outcome> {
        self.cases
            .iter()
            .find(|report| report.case == case)
            .map(|report| &report.outcome)
    }
}

impl std::fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(err) = &self.setup_error {
            writeln!(f, "setup failed: {err}")?;
        }

        for CaseReport { case, outcome } in &self.cases {
            match outcome {
                Outcome::Passed => writeln!(f, "ok      {case}")?,
                Outcome::Failed(err) => writeln!(f, "FAILED  {case}: {err}")?,
                Outcome::NotRun => writeln!(f, "skipped {case}")?,
            }
        }

        if let Some(err) = &self.teardown_error {
            writeln!(f, "teardown failed: {err}")?;
        }

        let passed = self
            .cases
            .iter()
            .filter(|report| report.outcome == Outcome::Passed)
            .count();

        write!(
            f,
            "{}: {passed} passed; {} failed",
            if self.passed() { "ok" } else { "FAILED" },
            self.failures().count()
        )
    }
}

/// Seeds `harness`, runs `cases` in order and tears the fixture down.
///
/// A failing case does not stop the ones after it. If seeding fails, no case runs and the
/// partial fixture is still torn down, with the teardown result recorded like any other run.
#[instrument(skip(harness))]
pub async fn run_with(harness: Harness, cases: &[Case]) -> SuiteReport {
    let seeded = harness.seed().await;

    if let Err(err) = seeded {
        error!("Setup failed: {err:#}");

        let mut report = SuiteReport {
            setup_error: Some(format!("{err:#}")),
            cases: cases
                .iter()
                .map(|&case| CaseReport {
                    case,
                    outcome: Outcome::NotRun,
                })
                .collect(),
            ..SuiteReport::default()
        };
        report.record_teardown(harness.teardown().await);

        return report;
    }

    let mut report = SuiteReport::default();

    for &case in cases {
        let outcome = match case.run(&harness).await {
            Ok(()) => {
                info!(%case, "Case passed");
                Outcome::Passed
            }
            Err(err) => {
                error!(%case, "Case failed: {err:#}");
                Outcome::Failed(format!("{err:#}"))
            }
        };

        report.cases.push(CaseReport { case, outcome });
    }

    report.record_teardown(harness.teardown().await);

    report
}

/// Connects with `env` and runs every case.
///
/// # Errors
///
/// Will return `Err` only if the connections cannot be opened; everything after that is
/// recorded in the report.
pub async fn run(env: &Env) -> anyhow::Result<SuiteReport> {
    let harness = Harness::connect(env).await?;

    Ok(run_with(harness, &Case::ALL).await)
}
