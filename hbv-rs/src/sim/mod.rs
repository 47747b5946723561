//! Re-parameterisation and execution of the external disease model.
mod command;
mod overrides;
mod runner;
mod sharing;

pub use command::*;
pub use overrides::*;
pub use runner::*;
pub use sharing::*;

use crate::{
    error::{Error, Result},
    output::{BurdenMetric, WideTable},
    params::AgeBin,
    scenarios::Scenario,
    Real, RunIndex, Year,
};
use getset::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The compartmental model this crate drives.
///
/// An execution must not depend on state left by earlier executions: every
/// call receives the scenario and the complete set of overrides to apply on
/// top of the calibrated parameters. An empty override set means a central
/// (point estimate) run.
pub trait ExternalModel {
    fn execute(&self, scenario: &Scenario, overrides: &ParameterOverrides) -> Result<ModelOutput>;
}

impl<M: ExternalModel + ?Sized> ExternalModel for Box<M> {
    fn execute(&self, scenario: &Scenario, overrides: &ParameterOverrides) -> Result<ModelOutput> {
        (**self).execute(scenario, overrides)
    }
}

/// The five burden series of one model execution, each as a wide
/// year × age-bin table.
#[derive(Debug, Clone, PartialEq, Default, Getters, Serialize, Deserialize)]
pub struct ModelOutput {
    #[getset(get = "pub")]
    years: Vec<Year>,
    tables: BTreeMap<BurdenMetric, WideTable>,
}

impl ModelOutput {
    pub fn new(years: Vec<Year>) -> Self {
        ModelOutput {
            years,
            tables: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, metric: BurdenMetric, table: WideTable) {
        self.tables.insert(metric, table);
    }

    pub fn table(&self, metric: BurdenMetric) -> Option<&WideTable> {
        self.tables.get(&metric)
    }

    /// Bin values of every metric in a year, or None if any metric lacks it.
    pub fn bin_values(&self, year: Year) -> Option<Vec<(BurdenMetric, Vec<Real>)>> {
        self.tables
            .iter()
            .map(|(m, t)| t.row(year).map(|row| (*m, row.to_vec())))
            .collect()
    }

    /// Check that every metric is present, spans exactly the output years
    /// and only holds finite numbers.
    pub fn validate(&self) -> Result<()> {
        for metric in BurdenMetric::all() {
            let table = self
                .tables
                .get(&metric)
                .ok_or_else(|| Error::MalformedOutput(format!("missing `{}` series", metric.model_output())))?;
            if table.years() != &self.years {
                return Err(Error::MalformedOutput(format!(
                    "`{}` has {} years, expected {}",
                    metric.model_output(),
                    table.nrows(),
                    self.years.len()
                )));
            }
            if !table.is_finite() {
                return Err(Error::MalformedOutput(format!(
                    "`{}` contains non-finite values",
                    metric.model_output()
                )));
            }
        }
        Ok(())
    }

    /// Total of a metric in a year over every age bin.
    pub fn total(&self, metric: BurdenMetric, year: Year) -> Option<Real> {
        let table = self.tables.get(&metric)?;
        Some(AgeBin::all().filter_map(|b| table.get(year, b)).sum())
    }
}

/// A successful execution. `run_index` is None for the central run.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct RunResult {
    #[getset(get = "pub")]
    scenario: String,
    #[getset(get_copy = "pub")]
    run_index: Option<RunIndex>,
    #[getset(get = "pub")]
    output: ModelOutput,
}

impl RunResult {
    pub fn new(scenario: &str, run_index: Option<RunIndex>, output: ModelOutput) -> Self {
        RunResult {
            scenario: scenario.to_string(),
            run_index,
            output,
        }
    }

    /// One-based identifier used in output tables.
    pub fn run_id(&self) -> Option<u32> {
        self.run_index.map(|i| (i + 1) as u32)
    }
}
