use super::{ExternalModel, ModelOutput, ParameterOverrides, RunResult, SharingTable};
use crate::{
    error::{Error, Result},
    sampler::SampleSet,
    scenarios::Scenario,
    RunIndex, Year,
};
use getset::*;
use log::*;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

/// A (scenario, run) execution that produced no usable output.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct RunFailure {
    #[getset(get = "pub")]
    scenario: String,
    #[getset(get_copy = "pub")]
    run_index: Option<RunIndex>,
    #[getset(get = "pub")]
    reason: String,
}

impl RunFailure {
    pub fn new(scenario: &str, run_index: Option<RunIndex>, reason: &str) -> Self {
        RunFailure {
            scenario: scenario.to_string(),
            run_index,
            reason: reason.to_string(),
        }
    }
}

/// Successful and failed executions of one scenario.
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct ScenarioRuns {
    scenario: Scenario,
    results: Vec<RunResult>,
    failures: Vec<RunFailure>,
}

impl ScenarioRuns {
    fn new(scenario: &Scenario) -> Self {
        ScenarioRuns {
            scenario: scenario.clone(),
            results: vec![],
            failures: vec![],
        }
    }

    /// Indices of the runs that succeeded, in run order.
    pub fn succeeded(&self) -> Vec<Option<RunIndex>> {
        self.results.iter().map(|r| r.run_index()).collect()
    }

    /// The single result of a central run, if it succeeded.
    pub fn central(&self) -> Option<&ModelOutput> {
        self.results
            .iter()
            .find(|r| r.run_index().is_none())
            .map(|r| r.output())
    }
}

/// Drives the external model of one country over scenarios and draws.
///
/// Runs are executed one after the other. A failing run, whether it returns
/// an error, panics, times out or produces malformed output, is recorded and
/// the remaining runs proceed.
#[derive(Debug, Getters, CopyGetters)]
pub struct Orchestrator<M> {
    #[getset(get = "pub")]
    country: String,
    model: Arc<M>,
    #[getset(get = "pub")]
    sharing: SharingTable,
    #[getset(get_copy = "pub")]
    timeout: Option<Duration>,
    #[getset(get_copy = "pub")]
    years: Option<(Year, Year)>,
}

impl<M> Orchestrator<M>
where
    M: ExternalModel + Send + Sync + 'static,
{
    pub fn new(country: &str, model: M, sharing: SharingTable) -> Self {
        Orchestrator {
            country: country.to_string(),
            model: Arc::new(model),
            sharing,
            timeout: None,
            years: None,
        }
    }

    /// Require every output to cover exactly the years `first..=last`.
    pub fn with_years(mut self, first: Year, last: Year) -> Self {
        self.years = Some((first, last));
        return self;
    }

    /// Abandon executions that take longer than the given duration.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        return self;
    }

    /// Run every scenario once with the calibrated point estimates.
    pub fn run_central(&self, scenarios: &[Scenario]) -> Vec<ScenarioRuns> {
        scenarios
            .iter()
            .map(|scenario| {
                let mut runs = ScenarioRuns::new(scenario);
                self.record(&mut runs, None, ParameterOverrides::new());
                runs
            })
            .collect()
    }

    /// Run every scenario once per draw, re-parameterising the model from
    /// the sample set through the sharing table.
    pub fn run_stochastic(
        &self,
        scenarios: &[Scenario],
        samples: &SampleSet,
        run_count: usize,
    ) -> Vec<ScenarioRuns> {
        for rule in self.sharing.unresolved(samples) {
            debug!(
                target: "runs",
                "{}: {} not sampled, {} keeps its point estimate",
                self.country, rule.source().0, rule.parameter()
            );
        }
        if run_count > samples.run_count() {
            warn!(
                target: "runs",
                "{}: {} runs requested but only {} draws sampled, running {}",
                self.country, run_count, samples.run_count(), samples.run_count()
            );
        }
        let run_count = run_count.min(samples.run_count());

        scenarios
            .iter()
            .map(|scenario| {
                let mut runs = ScenarioRuns::new(scenario);
                for run in 0..run_count {
                    let overrides = self.sharing.overrides_for_run(samples, run);
                    self.record(&mut runs, Some(run), overrides);
                }
                if !runs.failures.is_empty() {
                    warn!(
                        target: "runs",
                        "{} / {}: {} of {} runs failed",
                        self.country, scenario.name(), runs.failures.len(), run_count
                    );
                }
                runs
            })
            .collect()
    }

    fn record(&self, runs: &mut ScenarioRuns, run: Option<RunIndex>, overrides: ParameterOverrides) {
        let name = runs.scenario.name().clone();
        let label = run.map(|r| format!("run {}", r + 1)).unwrap_or_else(|| "central".into());
        debug!(target: "runs", "{} / {}: {}", self.country, name, label);

        let outcome = self.execute(&runs.scenario, overrides).and_then(|out| {
            out.validate()?;
            self.check_years(&out)?;
            Ok(out)
        });
        match outcome {
            Ok(output) => runs.results.push(RunResult::new(&name, run, output)),
            Err(e) => {
                error!(target: "runs", "{} / {}: {} failed: {}", self.country, name, label, e);
                runs.failures.push(RunFailure::new(&name, run, &e.to_string()));
            }
        }
    }

    fn check_years(&self, output: &ModelOutput) -> Result<()> {
        if let Some((first, last)) = self.years {
            let expected: Vec<Year> = (first..=last).collect();
            if output.years() != &expected {
                return Err(Error::MalformedOutput(format!(
                    "expected years {}-{}, got {} rows",
                    first,
                    last,
                    output.years().len()
                )));
            }
        }
        Ok(())
    }

    fn execute(&self, scenario: &Scenario, overrides: ParameterOverrides) -> Result<ModelOutput> {
        let timeout = match self.timeout {
            Some(t) => t,
            None => {
                let model = &self.model;
                return panic::catch_unwind(AssertUnwindSafe(|| model.execute(scenario, &overrides)))
                    .unwrap_or(Err(Error::RunPanicked));
            }
        };

        // The worker is detached on timeout; its result is dropped when it
        // eventually finishes.
        let (tx, rx) = mpsc::channel();
        let model = Arc::clone(&self.model);
        let scenario = scenario.clone();
        thread::spawn(move || {
            let _ = tx.send(model.execute(&scenario, &overrides));
        });
        match rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::RunTimeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::RunPanicked),
        }
    }
}
