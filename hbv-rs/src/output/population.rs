use crate::{
    error::{Error, Result},
    params::AgeBin,
    Age, Real, Year,
};
use getset::*;
use log::*;
use serde::Deserialize;
use std::{collections::BTreeMap, io, path::Path};

#[derive(Debug, Deserialize)]
struct PopulationRow {
    country_code: String,
    country: String,
    age_from: Age,
    year: Year,
    value: Real,
}

/// Single-year population counts of one country, summed over sex.
#[derive(Debug, Clone, PartialEq, Default, Getters, Setters)]
pub struct PopulationTable {
    #[getset(get = "pub")]
    country: String,
    #[getset(get = "pub", set = "pub")]
    country_name: String,
    counts: BTreeMap<Year, BTreeMap<Age, Real>>,
}

impl PopulationTable {
    pub fn new(country: &str, country_name: &str) -> Self {
        PopulationTable {
            country: country.to_string(),
            country_name: country_name.to_string(),
            counts: BTreeMap::new(),
        }
    }

    /// Read the rows of a country with `first <= year <= last` from a table
    /// with columns `country_code, country, age_from, year, value` (other
    /// columns are ignored). Rows for the same age and year are summed.
    pub fn from_reader<R: io::Read>(reader: R, country: &str, years: (Year, Year)) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut table = PopulationTable::new(country, "");
        for row in rdr.deserialize() {
            let row: PopulationRow = row?;
            if row.country_code != country || row.year < years.0 || row.year > years.1 {
                continue;
            }
            if table.country_name.is_empty() {
                table.country_name = row.country;
            }
            table.add(row.year, row.age_from, row.value);
        }
        if table.counts.is_empty() {
            return Err(Error::MissingInput(format!("no population rows for {}", country)));
        }
        Ok(table)
    }

    pub fn load(path: impl AsRef<Path>, country: &str, years: (Year, Year)) -> Result<Self> {
        let path = path.as_ref();
        let rdr = std::fs::File::open(path)
            .map_err(|e| Error::MissingInput(format!("{}: {}", path.display(), e)))?;
        PopulationTable::from_reader(rdr, country, years)
    }

    pub fn add(&mut self, year: Year, age: Age, value: Real) {
        *self.counts.entry(year).or_default().entry(age).or_insert(0.0) += value;
    }

    pub fn get(&self, year: Year, age: Age) -> Option<Real> {
        self.counts.get(&year)?.get(&age).copied()
    }

    pub fn years(&self) -> impl Iterator<Item = Year> + '_ {
        self.counts.keys().copied()
    }

    /// Population of a coarse bin in a year.
    pub fn bin_total(&self, year: Year, bin: AgeBin) -> Real {
        self.counts
            .get(&year)
            .map(|ages| {
                ages.iter()
                    .filter(|(a, _)| bin.contains(**a))
                    .map(|(_, v)| v)
                    .sum()
            })
            .unwrap_or(0.0)
    }
}

/// Fraction of a coarse bin's population at a single-year age.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BinShare {
    Share(Real),
    /// The bin has no population in that year, so nothing can be
    /// redistributed into it.
    EmptyBin,
}

impl BinShare {
    /// Numeric weight. Empty bins weigh zero.
    pub fn value(self) -> Real {
        match self {
            BinShare::Share(x) => x,
            BinShare::EmptyBin => 0.0,
        }
    }

    pub fn is_empty_bin(self) -> bool {
        self == BinShare::EmptyBin
    }
}

/// Per-year weights that split a coarse-bin quantity over single-year ages
/// in proportion to population.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct RedistributionWeights {
    #[getset(get = "pub")]
    country: String,
    #[getset(get = "pub")]
    country_name: String,
    weights: BTreeMap<Year, BTreeMap<Age, BinShare>>,
    #[getset(get = "pub")]
    empty_bins: Vec<(Year, AgeBin)>,
}

impl RedistributionWeights {
    /// Compute weight(age) = population(age) / population(bin ∋ age) for each
    /// year. Bins with zero population get [`BinShare::EmptyBin`] for all of
    /// their ages and a warning.
    pub fn from_population(population: &PopulationTable) -> Self {
        let mut weights = BTreeMap::new();
        let mut empty_bins = Vec::new();

        for (&year, ages) in population.counts.iter() {
            let mut totals = [0.0; AgeBin::COUNT];
            for (&age, &v) in ages {
                totals[AgeBin::for_age(age).index()] += v;
            }

            let mut row = BTreeMap::new();
            for (&age, &v) in ages {
                let bin = AgeBin::for_age(age);
                let total = totals[bin.index()];
                let share = if total > 0.0 {
                    BinShare::Share(v / total)
                } else {
                    BinShare::EmptyBin
                };
                row.insert(age, share);
            }

            for bin in AgeBin::all() {
                let present = ages.keys().any(|&a| bin.contains(a));
                if present && !(totals[bin.index()] > 0.0) {
                    warn!(target: "weights", "{}: no population in age bin {} in {}, weights set to 0", population.country, bin, year);
                    empty_bins.push((year, bin));
                }
            }
            weights.insert(year, row);
        }

        RedistributionWeights {
            country: population.country.clone(),
            country_name: population.country_name.clone(),
            weights,
            empty_bins,
        }
    }

    pub fn get(&self, year: Year, age: Age) -> Option<BinShare> {
        self.weights.get(&year)?.get(&age).copied()
    }

    pub fn years(&self) -> impl Iterator<Item = Year> + '_ {
        self.weights.keys().copied()
    }

    /// Weights of a year, in age order.
    pub fn year(&self, year: Year) -> impl Iterator<Item = (Age, BinShare)> + '_ {
        self.weights
            .get(&year)
            .into_iter()
            .flat_map(|row| row.iter().map(|(a, s)| (*a, *s)))
    }
}
