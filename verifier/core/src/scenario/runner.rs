use tracing::{error, info};

use super::{ScenarioError, ScenarioResult, UseCase};

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub result: ScenarioResult,
}

#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<ScenarioOutcome>,
}

impl RunReport {
    #[must_use]
    pub fn outcomes(&self) -> &[ScenarioOutcome] {
        &self.outcomes
    }

    /// True when every executed use case succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    #[must_use]
    pub fn first_failure(&self) -> Option<&ScenarioError> {
        self.outcomes
            .iter()
            .find_map(|outcome| outcome.result.as_ref().err())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioError> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err())
    }
}

/// Runs use cases one after another. With `fail_fast` the first failure ends
/// the run.
pub struct ScenarioRunner {
    use_cases: Vec<Box<dyn UseCase>>,
    fail_fast: bool,
}

impl ScenarioRunner {
    #[must_use]
    pub fn new(use_cases: Vec<Box<dyn UseCase>>) -> Self {
        Self {
            use_cases,
            fail_fast: true,
        }
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.use_cases.iter().map(|use_case| use_case.name()).collect()
    }

    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        for use_case in &self.use_cases {
            let name = use_case.name();
            info!("Running test {name}");
            let result = use_case.run_test().await;
            let failed = match &result {
                Ok(()) => {
                    info!(use_case = name, "test succeeded");
                    false
                }
                Err(failure) => {
                    error!(
                        use_case = name,
                        step = %failure.step,
                        kind = failure.failure.kind(),
                        "{failure}"
                    );
                    true
                }
            };
            report.outcomes.push(ScenarioOutcome {
                name: name.to_owned(),
                result,
            });
            if failed && self.fail_fast {
                info!("stopping after the first failure");
                break;
            }
        }
        report
    }
}
