use crate::{
    error::Result,
    params::{EstimateRow, Stratum},
    Real,
};
use std::{collections::BTreeMap, io};

/// Parameter values replacing the calibrated point estimates for one model
/// execution. Built fresh for every run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterOverrides {
    values: BTreeMap<(String, Stratum), Real>,
}

impl ParameterOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, parameter: &str, stratum: Stratum, value: Real) {
        self.values.insert((parameter.to_string(), stratum), value);
    }

    pub fn get(&self, parameter: &str, stratum: Stratum) -> Option<Real> {
        self.values.get(&(parameter.to_string(), stratum)).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Stratum, Real)> {
        self.values.iter().map(|((p, s), v)| (p.as_str(), *s, *v))
    }

    pub fn rows(&self) -> impl Iterator<Item = EstimateRow> + '_ {
        self.iter().map(|(p, s, v)| EstimateRow {
            parameter: p.to_string(),
            population: s,
            value: v,
        })
    }

    /// Write as `parameter,population,value` CSV, the same layout as point
    /// estimate files.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(&["parameter", "population", "value"])?;
        for row in self.rows() {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl FromIterator<EstimateRow> for ParameterOverrides {
    fn from_iter<I: IntoIterator<Item = EstimateRow>>(iter: I) -> Self {
        let mut overrides = ParameterOverrides::new();
        for row in iter {
            overrides.set(&row.parameter, row.population, row.value);
        }
        return overrides;
    }
}
