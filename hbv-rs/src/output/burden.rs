use super::RedistributionWeights;
use crate::{
    error::Result,
    params::AgeBin,
    sim::{ModelOutput, RunResult},
    utils::round_to,
    Age, Real, Year,
};
use getset::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, io, path::Path};

/// The five burden quantities reported for every age, year and country.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurdenMetric {
    CohortSize,
    Cases,
    Deaths,
    Dalys,
    Yll,
}

impl BurdenMetric {
    pub fn all() -> [BurdenMetric; 5] {
        use BurdenMetric::*;
        [CohortSize, Cases, Deaths, Dalys, Yll]
    }

    /// Column name in burden tables.
    pub fn column(self) -> &'static str {
        match self {
            BurdenMetric::CohortSize => "cohort_size",
            BurdenMetric::Cases => "cases",
            BurdenMetric::Deaths => "deaths",
            BurdenMetric::Dalys => "dalys",
            BurdenMetric::Yll => "yll",
        }
    }

    /// Name of the output series in the disease model.
    pub fn model_output(self) -> &'static str {
        match self {
            BurdenMetric::CohortSize => "alive",
            BurdenMetric::Cases => "tot_inc",
            BurdenMetric::Deaths => ":dd_hbv",
            BurdenMetric::Dalys => "dalys",
            BurdenMetric::Yll => "yll",
        }
    }

    /// Accept either the model series name or the table column name.
    pub fn from_name(name: &str) -> Option<Self> {
        BurdenMetric::all()
            .iter()
            .copied()
            .find(|m| m.model_output() == name || m.column() == name)
    }
}

impl fmt::Display for BurdenMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Central tables come from the point-estimate run, stochastic tables from
/// the sampled runs and carry a `run_id` column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Central,
    Stochastic,
}

impl TableKind {
    /// Decimal places kept on export.
    pub fn decimals(self) -> u32 {
        match self {
            TableKind::Central => 2,
            TableKind::Stochastic => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TableKind::Central => "central",
            TableKind::Stochastic => "stochastic",
        }
    }

    /// Per-country file name, e.g. `VNM_Baseline_central.csv`.
    pub fn file_name(self, country: &str, scenario: &str) -> String {
        format!("{}_{}_{}.csv", country, scenario, self.label())
    }

    /// Consortium file name, e.g. `central-burden-hepb-no-vaccination.csv`.
    pub fn combined_file_name(self, scenario_id: &str) -> String {
        format!("{}-burden-{}.csv", self.label(), scenario_id)
    }
}

/// One row of a burden table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurdenRecord {
    pub disease: String,
    pub year: Year,
    pub age: Age,
    pub country: String,
    pub country_name: String,
    pub cohort_size: Real,
    pub cases: Real,
    pub dalys: Real,
    pub deaths: Real,
    pub yll: Real,
    #[serde(default)]
    pub run_id: Option<u32>,
}

impl BurdenRecord {
    pub fn metric(&self, metric: BurdenMetric) -> Real {
        match metric {
            BurdenMetric::CohortSize => self.cohort_size,
            BurdenMetric::Cases => self.cases,
            BurdenMetric::Deaths => self.deaths,
            BurdenMetric::Dalys => self.dalys,
            BurdenMetric::Yll => self.yll,
        }
    }

    pub fn set_metric(&mut self, metric: BurdenMetric, value: Real) {
        let slot = match metric {
            BurdenMetric::CohortSize => &mut self.cohort_size,
            BurdenMetric::Cases => &mut self.cases,
            BurdenMetric::Deaths => &mut self.deaths,
            BurdenMetric::Dalys => &mut self.dalys,
            BurdenMetric::Yll => &mut self.yll,
        };
        *slot = value;
    }
}

const COLUMNS: [&str; 10] = [
    "disease",
    "year",
    "age",
    "country",
    "country_name",
    "cohort_size",
    "cases",
    "dalys",
    "deaths",
    "yll",
];

// Column order of the metrics in exported files
const METRIC_COLUMNS: [BurdenMetric; 5] = [
    BurdenMetric::CohortSize,
    BurdenMetric::Cases,
    BurdenMetric::Dalys,
    BurdenMetric::Deaths,
    BurdenMetric::Yll,
];

/// A burden table in the consortium's long format.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct BurdenTable {
    #[getset(get_copy = "pub")]
    kind: TableKind,
    #[getset(get = "pub")]
    records: Vec<BurdenRecord>,
}

impl BurdenTable {
    pub fn new(kind: TableKind) -> Self {
        BurdenTable {
            kind,
            records: vec![],
        }
    }

    pub fn from_records(kind: TableKind, records: Vec<BurdenRecord>) -> Self {
        BurdenTable { kind, records }
    }

    pub fn into_records(self) -> Vec<BurdenRecord> {
        self.records
    }

    pub fn push(&mut self, record: BurdenRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = BurdenRecord>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sort by (run_id, age, year) for stochastic tables and (age, year) for
    /// central tables.
    pub fn sort(&mut self) {
        match self.kind {
            TableKind::Stochastic => self
                .records
                .sort_by_key(|r| (r.run_id, r.age, r.year)),
            TableKind::Central => self.records.sort_by_key(|r| (r.age, r.year)),
        }
    }

    /// Sort by (age, country, year), the order of the combined deliverables.
    pub fn sort_combined(&mut self) {
        self.records
            .sort_by(|a, b| (a.age, &a.country, a.year).cmp(&(b.age, &b.country, b.year)));
    }

    /// Write as CSV, rounding metrics to the precision of the table kind.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let stochastic = self.kind == TableKind::Stochastic;
        let mut header: Vec<&str> = COLUMNS.to_vec();
        if stochastic {
            header.push("run_id");
        }
        wtr.write_record(&header)?;

        let places = self.kind.decimals();
        for r in &self.records {
            let mut row = vec![
                r.disease.clone(),
                r.year.to_string(),
                r.age.to_string(),
                r.country.clone(),
                r.country_name.clone(),
            ];
            row.extend(
                METRIC_COLUMNS
                    .iter()
                    .map(|m| round_to(r.metric(*m), places).to_string()),
            );
            if stochastic {
                row.push(r.run_id.map(|id| id.to_string()).unwrap_or_default());
            }
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(io::BufWriter::new(file))
    }

    pub fn read_csv<R: io::Read>(reader: R, kind: TableKind) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut records = Vec::new();
        for row in rdr.deserialize() {
            records.push(row?);
        }
        Ok(BurdenTable { kind, records })
    }

    pub fn load(path: impl AsRef<Path>, kind: TableKind) -> Result<Self> {
        BurdenTable::read_csv(std::fs::File::open(path)?, kind)
    }
}

/// Reshapes model outputs into single-year burden tables.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct Aggregator {
    #[getset(get = "pub")]
    disease: String,
    #[getset(get_copy = "pub")]
    first_year: Year,
    #[getset(get_copy = "pub")]
    last_year: Year,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::new("HepB", (2000, 2100))
    }
}

impl Aggregator {
    pub fn new(disease: &str, years: (Year, Year)) -> Self {
        Aggregator {
            disease: disease.to_string(),
            first_year: years.0,
            last_year: years.1,
        }
    }

    /// Years of the output window that are in the model output but not in
    /// the weights, or the other way round. They produce no rows.
    pub fn uncovered_years(&self, output: &ModelOutput, weights: &RedistributionWeights) -> Vec<Year> {
        let in_window = |y: &Year| *y >= self.first_year && *y <= self.last_year;
        let weighted: BTreeSet<Year> = weights.years().filter(in_window).collect();
        let modelled: BTreeSet<Year> = output.years().iter().copied().filter(in_window).collect();
        weighted.symmetric_difference(&modelled).copied().collect()
    }

    fn warn_uncovered(&self, output: &ModelOutput, weights: &RedistributionWeights) {
        let years = self.uncovered_years(output, weights);
        if let (Some(first), Some(last)) = (years.first(), years.last()) {
            warn!(
                target: "weights",
                "{}: {} years between {} and {} lack population or model output and are left out",
                weights.country(), years.len(), first, last
            );
        }
    }

    /// Melt one model output and split each coarse-bin value over the
    /// single-year ages of its bin.
    ///
    /// Only years inside the output window that appear both in the weights
    /// and in the model output produce rows.
    pub fn records(
        &self,
        output: &ModelOutput,
        weights: &RedistributionWeights,
        run_id: Option<u32>,
    ) -> Vec<BurdenRecord> {
        let mut out = Vec::new();
        let years = weights
            .years()
            .filter(|y| *y >= self.first_year && *y <= self.last_year);

        for year in years {
            let row = match output.bin_values(year) {
                Some(row) => row,
                None => continue,
            };
            for (age, share) in weights.year(year) {
                let w = share.value();
                let bin = AgeBin::for_age(age).index();
                let mut record = BurdenRecord {
                    disease: self.disease.clone(),
                    year,
                    age,
                    country: weights.country().clone(),
                    country_name: weights.country_name().clone(),
                    cohort_size: 0.0,
                    cases: 0.0,
                    dalys: 0.0,
                    deaths: 0.0,
                    yll: 0.0,
                    run_id,
                };
                for (metric, values) in &row {
                    record.set_metric(*metric, values[bin] * w);
                }
                out.push(record);
            }
        }
        return out;
    }

    /// Table of the point-estimate run of a scenario.
    pub fn central(&self, output: &ModelOutput, weights: &RedistributionWeights) -> BurdenTable {
        self.warn_uncovered(output, weights);
        let mut table = BurdenTable::from_records(TableKind::Central, self.records(output, weights, None));
        table.sort();
        return table;
    }

    /// Table of all successful sampled runs of a scenario. Runs report their
    /// one-based `run_id`.
    pub fn stochastic(&self, runs: &[RunResult], weights: &RedistributionWeights) -> BurdenTable {
        let mut table = BurdenTable::new(TableKind::Stochastic);
        if let Some(run) = runs.first() {
            self.warn_uncovered(run.output(), weights);
        }
        for run in runs {
            let run_id = run.run_id();
            table.extend(self.records(run.output(), weights, run_id));
        }
        table.sort();
        return table;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        output::{PopulationTable, WideTable},
        sim::ModelOutput,
    };
    use assert_approx_eq::assert_approx_eq;

    fn weights() -> RedistributionWeights {
        let mut pop = PopulationTable::new("VNM", "Viet Nam");
        for year in 1999..=2001 {
            for age in 0..=100 {
                pop.add(year, age, 100.0 + age as Real);
            }
        }
        RedistributionWeights::from_population(&pop)
    }

    fn output(scale: Real) -> ModelOutput {
        let years = vec![1999, 2000, 2001];
        let mut out = ModelOutput::new(years.clone());
        for (k, metric) in BurdenMetric::all().iter().enumerate() {
            let rows = years
                .iter()
                .map(|&y| (y, [scale * (k + 1) as Real * (y - 1998) as Real; AgeBin::COUNT]))
                .collect();
            out.insert(*metric, WideTable::from_rows(rows));
        }
        return out;
    }

    #[test]
    fn metric_names() {
        assert_eq!(BurdenMetric::from_name(":dd_hbv"), Some(BurdenMetric::Deaths));
        assert_eq!(BurdenMetric::from_name("cohort_size"), Some(BurdenMetric::CohortSize));
        assert_eq!(BurdenMetric::from_name("prev"), None);
    }

    #[test]
    fn central_table_conserves_bin_totals() {
        let agg = Aggregator::new("HepB", (2000, 2100));
        let table = agg.central(&output(1.0), &weights());

        // 1999 is outside the window
        assert_eq!(table.len(), 2 * 101);
        assert!(table.records().iter().all(|r| r.year >= 2000 && r.run_id.is_none()));

        let first = &table.records()[0];
        assert_eq!((first.age, first.year), (0, 2000));
        assert_eq!(table.records()[1].year, 2001);

        let cases_20s: Real = table
            .records()
            .iter()
            .filter(|r| r.year == 2001 && AgeBin::AGE_20_29.contains(r.age))
            .map(|r| r.cases)
            .sum();
        assert_approx_eq!(cases_20s, 2.0 * 3.0, 1e-9);
    }

    #[test]
    fn stochastic_rows_carry_run_ids() {
        let agg = Aggregator::default();
        let runs = vec![
            RunResult::new("IA", Some(0), output(1.0)),
            RunResult::new("IA", Some(3), output(2.0)),
        ];
        let table = agg.stochastic(&runs, &weights());
        assert_eq!(table.len(), 2 * 2 * 101);
        assert_eq!(table.records()[0].run_id, Some(1));
        assert_eq!(table.records().last().unwrap().run_id, Some(4));
    }

    #[test]
    fn empty_bin_yields_zero_rows() {
        let mut pop = PopulationTable::new("XYZ", "Nowhere");
        for age in 0..=100 {
            pop.add(2045, age, if age >= 90 { 0.0 } else { 10.0 });
        }
        let weights = RedistributionWeights::from_population(&pop);
        let mut out = ModelOutput::new(vec![2045]);
        for metric in BurdenMetric::all() {
            out.insert(metric, WideTable::from_rows(vec![(2045, [7.0; AgeBin::COUNT])]));
        }

        let agg = Aggregator::default();
        let central = agg.central(&out, &weights);
        assert_eq!(central.len(), 101);
        let oldest: Vec<&BurdenRecord> = central.records().iter().filter(|r| r.age >= 90).collect();
        assert_eq!(oldest.len(), 11);
        for r in oldest {
            assert!(BurdenMetric::all().iter().all(|m| r.metric(*m) == 0.0));
        }
        let cases_30s: Real = central
            .records()
            .iter()
            .filter(|r| AgeBin::AGE_30_39.contains(r.age))
            .map(|r| r.cases)
            .sum();
        assert_approx_eq!(cases_30s, 7.0, 1e-9);

        let runs = vec![RunResult::new("No Vaccination", Some(0), out)];
        let stochastic = agg.stochastic(&runs, &weights);
        assert_eq!(stochastic.len(), 101);
        assert!(stochastic.records().iter().filter(|r| r.age >= 90).all(|r| r.deaths == 0.0));
    }

    #[test]
    fn years_without_population_are_reported() {
        let agg = Aggregator::new("HepB", (1990, 2100));
        let mut pop = PopulationTable::new("VNM", "Viet Nam");
        for age in 0..=100 {
            pop.add(2000, age, 1.0);
        }
        let weights = RedistributionWeights::from_population(&pop);
        let out = output(1.0);

        assert_eq!(agg.uncovered_years(&out, &weights), vec![1999, 2001]);
        let table = agg.central(&out, &weights);
        assert!(table.records().iter().all(|r| r.year == 2000));
        assert_eq!(table.len(), 101);
        assert!(Aggregator::default().uncovered_years(&out, &self::weights()).is_empty());
    }

    #[test]
    fn csv_export_rounds_and_reads_back() {
        let rec = BurdenRecord {
            disease: "HepB".into(),
            year: 2000,
            age: 3,
            country: "VNM".into(),
            country_name: "Viet Nam".into(),
            cohort_size: 1234.567,
            cases: 2.5,
            dalys: -0.2,
            deaths: 0.125,
            yll: 7.0,
            run_id: Some(2),
        };

        let mut buf = Vec::new();
        BurdenTable::from_records(TableKind::Stochastic, vec![rec.clone()])
            .write_csv(&mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "disease,year,age,country,country_name,cohort_size,cases,dalys,deaths,yll,run_id"
        );
        assert_eq!(lines.next().unwrap(), "HepB,2000,3,VNM,Viet Nam,1235,2,0,0,7,2");

        let mut buf = Vec::new();
        BurdenTable::from_records(TableKind::Central, vec![rec])
            .write_csv(&mut buf)
            .unwrap();
        let back = BurdenTable::read_csv(&buf[..], TableKind::Central).unwrap();
        let r = &back.records()[0];
        assert_approx_eq!(r.cohort_size, 1234.57);
        assert_approx_eq!(r.deaths, 0.12);
        assert_eq!(r.run_id, None);
    }
}
