use super::Stratum;
use crate::{error::Result, Real};
use getset::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io, path::Path};

/// One row of a point estimate file: `parameter,population,value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateRow {
    pub parameter: String,
    pub population: Stratum,
    pub value: Real,
}

/// Calibrated per-country value of every model parameter at every stratum
/// where it applies.
///
/// Parameters that do not apply to a stratum are simply absent.
#[derive(Debug, Clone, PartialEq, Default, Getters, Serialize, Deserialize)]
pub struct PointEstimates {
    #[getset(get = "pub")]
    country: String,
    values: BTreeMap<String, BTreeMap<Stratum, Real>>,
}

impl PointEstimates {
    pub fn new(country: &str) -> Self {
        PointEstimates {
            country: country.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn from_rows(country: &str, rows: impl IntoIterator<Item = EstimateRow>) -> Self {
        let mut estimates = PointEstimates::new(country);
        for row in rows {
            estimates.insert(&row.parameter, row.population, row.value);
        }
        return estimates;
    }

    /// Read estimates from a CSV with header `parameter,population,value`.
    pub fn from_reader<R: io::Read>(country: &str, reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut rows = Vec::new();
        for row in rdr.deserialize() {
            rows.push(row?);
        }
        Ok(PointEstimates::from_rows(country, rows))
    }

    pub fn load(country: &str, path: impl AsRef<Path>) -> Result<Self> {
        let rdr = std::fs::File::open(path)?;
        PointEstimates::from_reader(country, rdr)
    }

    pub fn insert(&mut self, parameter: &str, stratum: Stratum, value: Real) {
        self.values
            .entry(parameter.to_string())
            .or_default()
            .insert(stratum, value);
    }

    pub fn get(&self, parameter: &str, stratum: Stratum) -> Option<Real> {
        self.values.get(parameter)?.get(&stratum).copied()
    }

    /// Strata where the parameter is defined, in stratum order.
    pub fn strata(&self, parameter: &str) -> impl Iterator<Item = (Stratum, Real)> + '_ {
        self.values
            .get(parameter)
            .into_iter()
            .flat_map(|m| m.iter().map(|(s, v)| (*s, *v)))
    }

    pub fn rows(&self) -> impl Iterator<Item = EstimateRow> + '_ {
        self.values.iter().flat_map(|(name, m)| {
            m.iter().map(move |(s, v)| EstimateRow {
                parameter: name.clone(),
                population: *s,
                value: *v,
            })
        })
    }
}
