use crate::{
    error::{Error, Result},
    params::{AgeBin, Stratum},
    Real, Year,
};
use getset::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io, path::Path};

/// Strata that receive coverage values. Vaccination happens at birth, so only
/// the youngest bin is affected.
pub const COVERAGE_STRATA: [Stratum; 2] = [
    Stratum::male(AgeBin::AGE_0),
    Stratum::female(AgeBin::AGE_0),
];

/// A year-indexed coverage trajectory for one model parameter.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct CoverageSeries {
    parameter: String,
    strata: Vec<Stratum>,
    years: Vec<Year>,
    values: Vec<Real>,
}

impl CoverageSeries {
    pub fn new(parameter: &str, strata: &[Stratum], points: Vec<(Year, Real)>) -> Self {
        let (years, values) = points.into_iter().unzip();
        CoverageSeries {
            parameter: parameter.to_string(),
            strata: strata.to_vec(),
            years,
            values,
        }
    }

    /// Coverage at the given year, if present in the series.
    pub fn at(&self, year: Year) -> Option<Real> {
        self.years
            .iter()
            .position(|&y| y == year)
            .map(|i| self.values[i])
    }

    pub fn points(&self) -> impl Iterator<Item = (Year, Real)> + '_ {
        self.years.iter().copied().zip(self.values.iter().copied())
    }
}

/// A named vaccination policy: the coverage series applied on top of the
/// calibrated parameter set.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct Scenario {
    name: String,
    id: String,
    coverage: Vec<CoverageSeries>,
}

impl Scenario {
    pub fn new(name: &str, id: &str, coverage: Vec<CoverageSeries>) -> Self {
        Scenario {
            name: name.to_string(),
            id: id.to_string(),
            coverage,
        }
    }

    /// Load the scenario's coverage for a country from `dir`.
    pub fn load(
        source: &ScenarioSource,
        dir: impl AsRef<Path>,
        country: &str,
        vaccines: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let path = dir.as_ref().join(&source.file);
        let rdr = std::fs::File::open(&path)
            .map_err(|e| Error::MissingInput(format!("{}: {}", path.display(), e)))?;
        let coverage = coverage_from_reader(rdr, country, vaccines)?;
        Ok(Scenario::new(&source.name, &source.id, coverage))
    }

    pub fn series(&self, parameter: &str) -> Option<&CoverageSeries> {
        self.coverage.iter().find(|c| c.parameter == parameter)
    }
}

/// Where a scenario comes from: its display name, the consortium identifier
/// used in deliverable file names and the coverage file it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct ScenarioSource {
    name: String,
    id: String,
    file: String,
}

impl ScenarioSource {
    pub fn new(name: &str, id: &str, file: &str) -> Self {
        ScenarioSource {
            name: name.to_string(),
            id: id.to_string(),
            file: file.to_string(),
        }
    }
}

/// The seven policy scenarios of the HepB submission.
pub fn default_sources() -> Vec<ScenarioSource> {
    vec![
        ScenarioSource::new("Baseline", "hepb-hepb3-bd-default", "baseline.csv"),
        ScenarioSource::new("Baseline No BD", "hepb-hepb3-default", "baseline_nbd.csv"),
        ScenarioSource::new("No Vaccination", "hepb-no-vaccination", "no_vax.csv"),
        ScenarioSource::new("IA", "hepb-hepb3-bd-ia2030", "ia.csv"),
        ScenarioSource::new("IA No BD", "hepb-hepb3-ia2030", "ia_nbd.csv"),
        ScenarioSource::new("Bluesky", "hepb-hepb3-bd-bluesky", "bsky.csv"),
        ScenarioSource::new("Bluesky No BD", "hepb-hepb3-bluesky", "bsky_nbd.csv"),
    ]
}

/// Vaccine names in coverage files and the model parameter each one drives.
pub fn default_vaccine_map() -> BTreeMap<String, String> {
    [("HepB_BD", "bd"), ("HepB", "hb3")]
        .iter()
        .map(|(v, p)| (v.to_string(), p.to_string()))
        .collect()
}

/// Read the coverage rows of one country from a table with columns
/// `vaccine, country_code, ...` followed by one column per year.
///
/// Columns whose header is not a year are ignored, as are vaccines without a
/// mapped parameter and empty cells.
pub fn coverage_from_reader<R: io::Read>(
    reader: R,
    country: &str,
    vaccines: &BTreeMap<String, String>,
) -> Result<Vec<CoverageSeries>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| Error::MissingInput(format!("coverage table has no `{}` column", name)))
    };
    let vaccine_col = column("vaccine")?;
    let country_col = column("country_code")?;
    let year_cols: Vec<(usize, Year)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| h.trim().parse::<Year>().ok().map(|y| (i, y)))
        .collect();

    let mut out = Vec::new();
    let mut matched = false;
    for record in rdr.records() {
        let record = record?;
        if record.get(country_col).map(str::trim) != Some(country) {
            continue;
        }
        matched = true;
        let vaccine = record.get(vaccine_col).unwrap_or("").trim();
        let parameter = match vaccines.get(vaccine) {
            Some(p) => p,
            None => {
                debug!("{}: ignoring coverage of unmapped vaccine `{}`", country, vaccine);
                continue;
            }
        };

        let mut points = Vec::with_capacity(year_cols.len());
        for &(i, year) in &year_cols {
            let cell = record.get(i).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            let value: Real = cell.parse().map_err(|_| {
                Error::MissingInput(format!(
                    "bad coverage value `{}` for {} {} in {}",
                    cell, country, vaccine, year
                ))
            })?;
            points.push((year, value));
        }
        out.push(CoverageSeries::new(parameter, &COVERAGE_STRATA, points));
    }

    if !matched {
        return Err(Error::MissingInput(format!("no coverage rows for {}", country)));
    }
    Ok(out)
}

/// Load every scenario for a country, in source order.
pub fn load_scenarios(
    sources: &[ScenarioSource],
    dir: impl AsRef<Path>,
    country: &str,
    vaccines: &BTreeMap<String, String>,
) -> Result<Vec<Scenario>> {
    sources
        .iter()
        .map(|src| Scenario::load(src, dir.as_ref(), country, vaccines))
        .collect()
}
