use crate::{
    config::Config,
    error::Result,
    output::{BurdenMetric, BurdenRecord, BurdenTable, TableKind},
    scenarios::ScenarioSource,
    Real, Year,
};
use getset::*;
use log::*;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::PathBuf,
};

/// Merge the per-country tables of one scenario.
///
/// Every country of `placeholders` that has no rows gets a copy of the
/// template country's rows with its own code and name and all metrics set to
/// zero. The template is `template` if present, otherwise the first country
/// found. The result is sorted by (age, country, year).
pub fn combine_scenario(
    kind: TableKind,
    tables: Vec<BurdenTable>,
    placeholders: &BTreeMap<String, String>,
    template: Option<&str>,
) -> BurdenTable {
    let mut records: Vec<BurdenRecord> = tables.into_iter().flat_map(|t| t.into_records()).collect();
    let present: BTreeSet<String> = records.iter().map(|r| r.country.clone()).collect();

    let template = template
        .filter(|t| present.contains(*t))
        .map(|t| t.to_string())
        .or_else(|| records.first().map(|r| r.country.clone()));

    let mut filler = Vec::new();
    match &template {
        Some(tpl) => {
            let rows: Vec<&BurdenRecord> = records.iter().filter(|r| &r.country == tpl).collect();
            for (code, name) in placeholders {
                if present.contains(code) {
                    continue;
                }
                debug!(target: "combine", "placeholder rows for {} from {}", code, tpl);
                filler.extend(rows.iter().map(|r| {
                    let mut row = (*r).clone();
                    row.country = code.clone();
                    row.country_name = name.clone();
                    for m in BurdenMetric::all() {
                        row.set_metric(m, 0.0);
                    }
                    row
                }));
            }
        }
        None => warn!(target: "combine", "no country tables, cannot build placeholders"),
    }
    records.extend(filler);

    let mut table = BurdenTable::from_records(kind, records);
    table.sort_combined();
    return table;
}

/// Builds the consortium deliverables from per-country files in the output
/// directory.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct Combiner {
    output_dir: PathBuf,
    countries: Vec<String>,
    scenarios: Vec<ScenarioSource>,
    missing_countries: BTreeMap<String, String>,
    country_names: BTreeMap<String, String>,
    regions: BTreeMap<String, String>,
    template_country: Option<String>,
}

impl Combiner {
    pub fn from_config(config: &Config) -> Self {
        let mut country_names = config.country_names().clone();
        for c in config.countries() {
            if let Some(name) = config.country_name(c) {
                country_names.insert(c.clone(), name.clone());
            }
        }
        Combiner {
            output_dir: config.output_dir().clone(),
            countries: config.countries().clone(),
            scenarios: config.scenarios().clone(),
            missing_countries: config.missing_countries().clone(),
            country_names,
            regions: config.regions().clone(),
            template_country: config.template_country().clone(),
        }
    }

    fn country_file(&self, kind: TableKind, country: &str, scenario: &str) -> PathBuf {
        self.output_dir.join(kind.file_name(country, scenario))
    }

    /// Read the tables of every country for a scenario. Countries without a
    /// file are returned separately.
    fn read_scenario(&self, kind: TableKind, scenario: &str) -> Result<(Vec<BurdenTable>, Vec<String>)> {
        let mut tables = Vec::new();
        let mut absent = Vec::new();
        for country in &self.countries {
            let path = self.country_file(kind, country, scenario);
            if !path.exists() {
                absent.push(country.clone());
                continue;
            }
            tables.push(BurdenTable::load(&path, kind)?);
        }
        Ok((tables, absent))
    }

    /// Write one combined file per scenario, named after its consortium id,
    /// and return the paths written.
    pub fn combine(&self, kind: TableKind) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for source in &self.scenarios {
            let (tables, absent) = self.read_scenario(kind, source.name())?;

            let mut placeholders = self.missing_countries.clone();
            for country in absent {
                let name = match self.country_names.get(&country) {
                    Some(name) => name.clone(),
                    None => {
                        warn!(target: "combine", "{}: no known name, using the code", country);
                        country.clone()
                    }
                };
                warn!(target: "combine", "{} / {}: no results, using placeholder rows", country, source.name());
                placeholders.insert(country, name);
            }

            let table = combine_scenario(kind, tables, &placeholders, self.template_country.as_deref());
            let path = self.output_dir.join(kind.combined_file_name(source.id()));
            table.save(&path)?;
            info!(target: "combine", "{} rows written to {}", table.len(), path.display());
            written.push(path);
        }
        Ok(written)
    }

    /// Cases and deaths per (country, year, scenario) of the central files,
    /// with the WHO region of each country.
    pub fn summary(&self) -> Result<Vec<SummaryRow>> {
        let mut rows = Vec::new();
        for source in &self.scenarios {
            let (tables, _) = self.read_scenario(TableKind::Central, source.name())?;
            for table in tables {
                let mut totals: BTreeMap<(String, Year), (Real, Real)> = BTreeMap::new();
                for r in table.records() {
                    let acc = totals.entry((r.country.clone(), r.year)).or_default();
                    acc.0 += r.cases;
                    acc.1 += r.deaths;
                }
                for ((country, year), (cases, deaths)) in totals {
                    let region = self.regions.get(&country).cloned().unwrap_or_default();
                    rows.push(SummaryRow {
                        country,
                        region,
                        cases,
                        deaths,
                        scenario: source.name().clone(),
                        year,
                    });
                }
            }
        }
        Ok(rows)
    }

    /// Write [`Combiner::summary`] to `combined_results.csv`.
    pub fn write_summary(&self) -> Result<PathBuf> {
        let path = self.output_dir.join("combined_results.csv");
        let rows = self.summary()?;
        write_summary(&rows, io::BufWriter::new(std::fs::File::create(&path)?))?;
        info!(target: "combine", "summary written to {}", path.display());
        Ok(path)
    }
}

/// A line of the combined summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub country: String,
    pub region: String,
    pub cases: Real,
    pub deaths: Real,
    pub scenario: String,
    pub year: Year,
}

pub fn write_summary<W: io::Write>(rows: &[SummaryRow], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&["country", "WHO region", "cases", "deaths", "scenario", "year"])?;
    for r in rows {
        wtr.write_record(&[
            r.country.clone(),
            r.region.clone(),
            r.cases.to_string(),
            r.deaths.to_string(),
            r.scenario.clone(),
            r.year.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{output::TableKind, Age};

    fn table(country: &str, name: &str, ages: &[Age], years: &[Year]) -> BurdenTable {
        let mut t = BurdenTable::new(TableKind::Central);
        for &age in ages {
            for &year in years {
                t.push(BurdenRecord {
                    disease: "HepB".into(),
                    year,
                    age,
                    country: country.into(),
                    country_name: name.into(),
                    cohort_size: 100.0,
                    cases: 1.5,
                    dalys: 2.0,
                    deaths: 0.5,
                    yll: 3.0,
                    run_id: None,
                });
            }
        }
        return t;
    }

    fn missing() -> BTreeMap<String, String> {
        Config::default().missing_countries().clone()
    }

    #[test]
    fn placeholders_mirror_template_rows() {
        let tables = vec![
            table("VNM", "Viet Nam", &[0, 1, 2], &[2000, 2001]),
            table("EGY", "Egypt", &[0, 1], &[2000, 2001, 2002]),
        ];
        let combined = combine_scenario(TableKind::Central, tables, &missing(), Some("EGY"));

        assert_eq!(combined.len(), 6 + 6 + 10 * 6);
        for (code, name) in missing() {
            let rows: Vec<&BurdenRecord> = combined.records().iter().filter(|r| r.country == code).collect();
            assert_eq!(rows.len(), 6);
            for r in rows {
                assert_eq!(r.country_name, name);
                assert!(BurdenMetric::all().iter().all(|m| r.metric(*m) == 0.0));
            }
        }

        let keys: Vec<(Age, &String, Year)> = combined
            .records()
            .iter()
            .map(|r| (r.age, &r.country, r.year))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn present_countries_are_not_duplicated() {
        let tables = vec![
            table("VNM", "Viet Nam", &[0], &[2000]),
            table("NAM", "Namibia", &[0], &[2000]),
        ];
        let combined = combine_scenario(TableKind::Central, tables, &missing(), Some("EGY"));
        let nam: Vec<&BurdenRecord> = combined.records().iter().filter(|r| r.country == "NAM").collect();
        assert_eq!(nam.len(), 1);
        assert_eq!(nam[0].cases, 1.5);
        // EGY absent: first country is the template
        assert_eq!(combined.len(), 2 + 9);
    }

    #[test]
    fn combine_files() {
        let dir = std::env::temp_dir().join(format!("hbv-combine-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = Config::default();
        config.set_output_dir(dir.clone());
        config.set_countries(vec!["VNM".into(), "EGY".into()]);
        let combiner = Combiner::from_config(&config);

        for source in combiner.scenarios() {
            table("EGY", "Egypt", &[0, 1], &[2000, 2001])
                .save(dir.join(TableKind::Central.file_name("EGY", source.name())))
                .unwrap();
        }

        let written = combiner.combine(TableKind::Central).unwrap();
        assert_eq!(written.len(), 7);
        let first = BurdenTable::load(&written[0], TableKind::Central).unwrap();
        // VNM has no results and no name: placeholder rows named by code
        assert_eq!(first.len(), 4 + 11 * 4);
        let vnm: Vec<&BurdenRecord> = first.records().iter().filter(|r| r.country == "VNM").collect();
        assert_eq!(vnm.len(), 4);
        assert!(vnm.iter().all(|r| r.country_name == "VNM" && r.cases == 0.0));
        assert!(written[0].ends_with("central-burden-hepb-hepb3-bd-default.csv"));

        let summary = combiner.summary().unwrap();
        assert_eq!(summary.len(), 7 * 2);
        assert_eq!(summary[0].cases, 3.0);
        assert_eq!(summary[0].deaths, 1.0);
        assert!(combiner.write_summary().unwrap().exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
