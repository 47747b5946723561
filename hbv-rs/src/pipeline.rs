//! End-to-end processing of countries: sample, run, aggregate, write, and
//! finally combine.
use crate::{
    combine::Combiner,
    config::Config,
    error::{Error, Result},
    output::{
        hbv_input_columns, Aggregator, BurdenTable, InputsTable, PopulationTable,
        RedistributionWeights, TableKind,
    },
    params::{PointEstimates, Stratum},
    sampler::{SampleSet, Sampler},
    scenarios::{load_scenarios, Scenario},
    sim::{ExternalModel, Orchestrator, RunFailure, ScenarioRuns, SharingTable},
};
use getset::*;
use log::*;
use rayon::prelude::*;
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

// Models that enforce the timeout themselves get this long to kill and reap
// their process before the run is abandoned.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Everything read from disk for one country.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct CountryInputs {
    country: String,
    estimates: PointEstimates,
    weights: RedistributionWeights,
    scenarios: Vec<Scenario>,
}

impl CountryInputs {
    pub fn new(estimates: PointEstimates, weights: RedistributionWeights, scenarios: Vec<Scenario>) -> Self {
        CountryInputs {
            country: estimates.country().clone(),
            estimates,
            weights,
            scenarios,
        }
    }

    pub fn load(config: &Config, country: &str) -> Result<Self> {
        let path = config.estimates_path(country);
        if !path.exists() {
            return Err(Error::MissingInput(format!("{} not found", path.display())));
        }
        let estimates = PointEstimates::load(country, &path)?;

        let mut population = PopulationTable::load(
            config.population_path(country),
            country,
            config.population_years(),
        )?;
        if let Some(name) = config.country_name(country) {
            population.set_country_name(name.clone());
        }
        let weights = RedistributionWeights::from_population(&population);

        let scenarios = load_scenarios(config.scenarios(), config.input_dir(), country, config.vaccines())?;
        Ok(CountryInputs::new(estimates, weights, scenarios))
    }
}

/// Tables produced for a country, before they are written.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct CountryResults {
    country: String,
    samples: SampleSet,
    inputs: InputsTable,
    central: Vec<(String, BurdenTable)>,
    stochastic: Vec<(String, BurdenTable)>,
    failures: Vec<RunFailure>,
}

impl CountryResults {
    /// Write every table of the country into `dir` and return the paths.
    ///
    /// Tables are written to a staging directory first and moved into `dir`
    /// only once all of them are complete. On error no file of the country is
    /// left in `dir`.
    pub fn save(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let staging = dir.join(format!(".{}-partial-{}", self.country, std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir(&staging)?;

        let result = self
            .write_files(&staging)
            .and_then(|names| publish(&staging, dir, &names));
        if let Err(e) = fs::remove_dir_all(&staging) {
            debug!(target: "pipeline", "cannot remove {}: {}", staging.display(), e);
        }
        if let Err(e) = &result {
            warn!(target: "pipeline", "{}: no files written: {}", self.country, e);
        }
        return result;
    }

    fn write_files(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();

        let name = format!("{}_inputs.csv", self.country);
        self.inputs.save(dir.join(&name))?;
        names.push(name);

        for (scenario, table) in self.central.iter().chain(self.stochastic.iter()) {
            let name = table.kind().file_name(&self.country, scenario);
            table.save(dir.join(&name))?;
            names.push(name);
        }

        let name = format!("{}_run_failures.csv", self.country);
        write_failures(&self.failures, io::BufWriter::new(fs::File::create(dir.join(&name))?))?;
        names.push(name);
        Ok(names)
    }
}

/// Move `names` from `staging` into `dir`. If a move fails, the files moved
/// so far are removed again.
fn publish(staging: &Path, dir: &Path, names: &[String]) -> Result<Vec<PathBuf>> {
    let mut moved: Vec<PathBuf> = Vec::new();
    for name in names {
        let target = dir.join(name);
        if let Err(e) = fs::rename(staging.join(name), &target) {
            for path in &moved {
                if let Err(e) = fs::remove_file(path) {
                    error!(target: "pipeline", "cannot remove {}: {}", path.display(), e);
                }
            }
            return Err(e.into());
        }
        moved.push(target);
    }
    Ok(moved)
}

/// Write failures as `scenario,run_id,reason`. Central runs have an empty
/// `run_id`.
pub fn write_failures<W: io::Write>(failures: &[RunFailure], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&["scenario", "run_id", "reason"])?;
    for f in failures {
        let run_id = f.run_index().map(|i| (i + 1).to_string()).unwrap_or_default();
        wtr.write_record(&[f.scenario().as_str(), run_id.as_str(), f.reason().as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Sample, run and aggregate one country. Nothing is written.
///
/// A scenario whose central run fails makes the whole country fail. Failed
/// stochastic runs are left out of the tables and reported.
pub fn process_country<M>(config: &Config, inputs: &CountryInputs, model: M) -> Result<CountryResults>
where
    M: ExternalModel + Send + Sync + 'static,
{
    let country = inputs.country();
    let sampler = Sampler::new(config.load_catalog()?, config.runs(), config.seed());
    let samples = sampler.sample(inputs.estimates());
    let table = InputsTable::build(&samples, inputs.estimates(), &hbv_input_columns());

    let strata: Vec<Stratum> = Stratum::all().collect();
    let (first, last) = config.model_years();
    let orchestrator = Orchestrator::new(country, model, SharingTable::hbv_default(&strata))
        .with_years(first, last)
        .with_timeout(config.timeout().map(|t| t + KILL_GRACE));

    let aggregator = Aggregator::new(config.disease(), config.output_years());
    let weights = inputs.weights();
    let mut failures = Vec::new();

    info!(target: "pipeline", "{}: central runs", country);
    let mut central = Vec::new();
    for runs in orchestrator.run_central(inputs.scenarios()) {
        failures.extend(runs.failures().iter().cloned());
        let name = runs.scenario().name().clone();
        let output = runs
            .central()
            .ok_or_else(|| Error::ModelFailed(format!("{}: central run of {} failed", country, name)))?;
        central.push((name, aggregator.central(output, weights)));
    }

    info!(target: "pipeline", "{}: {} stochastic runs per scenario", country, config.runs());
    let mut stochastic = Vec::new();
    for runs in orchestrator.run_stochastic(inputs.scenarios(), &samples, config.runs()) {
        report(country, &runs);
        failures.extend(runs.failures().iter().cloned());
        let name = runs.scenario().name().clone();
        stochastic.push((name, aggregator.stochastic(runs.results(), weights)));
    }

    Ok(CountryResults {
        country: country.clone(),
        samples,
        inputs: table,
        central,
        stochastic,
        failures,
    })
}

fn report(country: &str, runs: &ScenarioRuns) {
    let ok = runs.results().len();
    if ok == 0 {
        warn!(target: "pipeline", "{} / {}: no successful runs", country, runs.scenario().name());
    } else {
        info!(
            target: "pipeline",
            "{} / {}: {} runs aggregated, {} failed",
            country, runs.scenario().name(), ok, runs.failures().len()
        );
    }
}

/// Outcome of a country that completed.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct CountryReport {
    country: String,
    files: Vec<PathBuf>,
    failures: Vec<RunFailure>,
}

/// Load, process and write a single country.
pub fn run_country<M>(config: &Config, country: &str, model: M) -> Result<CountryReport>
where
    M: ExternalModel + Send + Sync + 'static,
{
    let inputs = CountryInputs::load(config, country)?;
    let results = process_country(config, &inputs, model)?;
    let files = results.save(config.output_dir())?;
    info!(target: "pipeline", "{}: {} files written", country, files.len());
    Ok(CountryReport {
        country: country.to_string(),
        files,
        failures: results.failures,
    })
}

/// Run every configured country in parallel, each with its own model built
/// by `make_model`. A failing country is logged and reported; the others are
/// unaffected.
pub fn run_countries<M, F>(config: &Config, make_model: F) -> Result<Vec<(String, Result<CountryReport>)>>
where
    M: ExternalModel + Send + Sync + 'static,
    F: Fn(&str) -> Result<M> + Sync,
{
    let job = || {
        config
            .countries()
            .par_iter()
            .map(|country| {
                let res = make_model(country).and_then(|model| run_country(config, country, model));
                if let Err(e) = &res {
                    error!(target: "pipeline", "{}: {}", country, e);
                }
                (country.clone(), res)
            })
            .collect::<Vec<_>>()
    };

    match config.threads() {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(n).build()?;
            Ok(pool.install(job))
        }
        None => Ok(job()),
    }
}

/// Run every country, wait for all of them and then build the combined
/// files.
pub fn run_all<M, F>(config: &Config, make_model: F) -> Result<Vec<(String, Result<CountryReport>)>>
where
    M: ExternalModel + Send + Sync + 'static,
    F: Fn(&str) -> Result<M> + Sync,
{
    let reports = run_countries(config, make_model)?;
    let failed = reports.iter().filter(|(_, r)| r.is_err()).count();
    info!(
        target: "pipeline",
        "{} countries done, {} failed",
        reports.len() - failed,
        failed
    );

    fs::create_dir_all(config.output_dir())?;
    let combiner = Combiner::from_config(config);
    combiner.combine(TableKind::Central)?;
    combiner.combine(TableKind::Stochastic)?;
    combiner.write_summary()?;
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        output::BurdenMetric,
        params::AgeBin,
        sim::{tests::flat_output, ModelOutput, ParameterOverrides},
        Real, Year,
    };
    use assert_approx_eq::assert_approx_eq;

    const YEARS: [Year; 3] = [2000, 2001, 2002];

    /// Scales every output by the `m_dc` override and fails when the draw is
    /// above 0.4.
    struct FakeModel;

    impl ExternalModel for FakeModel {
        fn execute(&self, _: &Scenario, overrides: &ParameterOverrides) -> crate::Result<ModelOutput> {
            let x = overrides.get("m_dc", Stratum::male(AgeBin::AGE_0)).unwrap_or(1.0);
            if x > 0.4 {
                return Err(Error::ModelFailed("unstable".into()));
            }
            Ok(flat_output(&YEARS, 10.0 * x))
        }
    }

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn setup(name: &str) -> Config {
        let root = std::env::temp_dir().join(format!("hbv-pipeline-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);

        let mut config = Config::default();
        config.set_input_dir(root.join("inputs"));
        config.set_output_dir(root.join("outputs"));
        config.set_runs(4);
        config.set_countries(vec!["VNM".into(), "EGY".into()]);
        config.set_timeout_secs(None);
        config.set_threads(Some(2));
        config.set_model_years((2000, 2002));
        config.set_output_years((2000, 2002));
        config.set_population_years((2000, 2002));
        config.set_country_names([("EGY".to_string(), "Egypt".to_string())].into_iter().collect());

        let dir = config.input_dir().clone();
        write(
            &config.estimates_path("VNM"),
            "parameter,population,value\nm_dc,0-0M,0.3\nte_cc_dc,0-0M,0.15\n",
        );
        let mut pop = String::from("country_code,country,age_from,gender,year,value\n");
        for year in YEARS {
            for age in 0..=100 {
                for gender in ["male", "female"] {
                    pop.push_str(&format!("VNM,Viet Nam,{},{},{},50\n", age, gender, year));
                }
            }
        }
        write(&config.population_path("VNM"), &pop);
        for source in config.scenarios() {
            write(
                &dir.join(source.file()),
                "disease,vaccine,country_code,country,2000,2001,2002\nHepB,HepB,VNM,Viet Nam,0.5,0.6,0.7\n",
            );
        }
        return config;
    }

    #[test]
    fn country_tables() {
        let config = setup("tables");
        let inputs = CountryInputs::load(&config, "VNM").unwrap();
        assert_eq!(inputs.scenarios().len(), 7);

        let results = process_country(&config, &inputs, FakeModel).unwrap();
        assert_eq!(results.central().len(), 7);
        assert_eq!(results.inputs().rows().len(), 4);

        // 101 ages over 3 years; the central output is split by population
        let (_, baseline) = &results.central()[0];
        assert_eq!(baseline.len(), 3 * 101);
        let total: Real = baseline
            .records()
            .iter()
            .filter(|r| r.year == 2001)
            .map(|r| r.metric(BurdenMetric::Cases))
            .sum();
        assert_approx_eq!(total, 10.0 * 12.0, 1e-9);

        let failed: Vec<usize> = results
            .failures()
            .iter()
            .filter(|f| f.scenario() == "Baseline")
            .filter_map(|f| f.run_index())
            .collect();
        let (_, stoch) = &results.stochastic()[0];
        assert_eq!(stoch.len(), (4 - failed.len()) * 3 * 101);
        assert!(stoch
            .records()
            .iter()
            .all(|r| !failed.contains(&(r.run_id.unwrap() as usize - 1))));
    }

    #[test]
    fn failing_country_falls_back_to_placeholders() {
        let config = setup("all");
        let reports = run_all(&config, |_| Ok(FakeModel)).unwrap();

        let vnm = reports.iter().find(|(c, _)| c == "VNM").unwrap();
        let egy = reports.iter().find(|(c, _)| c == "EGY").unwrap();
        assert!(vnm.1.is_ok());
        assert!(matches!(egy.1, Err(Error::MissingInput(_))));

        let out = config.output_dir();
        assert!(out.join("VNM_inputs.csv").exists());
        assert!(out.join("VNM_run_failures.csv").exists());
        assert!(out.join("VNM_No Vaccination_stochastic.csv").exists());
        assert!(!out.join("EGY_Baseline_central.csv").exists());

        let combined = BurdenTable::load(
            out.join(TableKind::Central.combined_file_name("hepb-hepb3-bd-default")),
            TableKind::Central,
        )
        .unwrap();
        // VNM, EGY placeholder and the ten missing countries
        assert_eq!(combined.len(), 12 * 3 * 101);
        assert!(combined
            .records()
            .iter()
            .filter(|r| r.country == "EGY")
            .all(|r| r.cases == 0.0 && r.country_name == "Egypt"));
        assert!(out.join("combined_results.csv").exists());

        fs::remove_dir_all(out.parent().unwrap()).unwrap();
    }

    #[test]
    fn interrupted_save_leaves_no_files() {
        let dir = std::env::temp_dir().join(format!("hbv-pipeline-save-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let samples = SampleSet::new("VNM", 1);
        let results = CountryResults {
            country: "VNM".into(),
            inputs: InputsTable::build(&samples, &PointEstimates::new("VNM"), &hbv_input_columns()),
            samples,
            central: vec![("Baseline".into(), BurdenTable::new(TableKind::Central))],
            stochastic: vec![("Baseline".into(), BurdenTable::new(TableKind::Stochastic))],
            failures: vec![],
        };

        // a directory where the stochastic table should go blocks the save
        let blocker = dir.join(TableKind::Stochastic.file_name("VNM", "Baseline"));
        fs::create_dir_all(blocker.join("occupied")).unwrap();
        assert!(results.save(&dir).is_err());

        let left: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec!["VNM_Baseline_stochastic.csv".to_string()]);

        fs::remove_dir_all(&blocker).unwrap();
        let files = results.save(&dir).unwrap();
        assert_eq!(files.len(), 4);
        assert!(files.iter().all(|f| f.exists()));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failure_rows() {
        let failures = vec![
            RunFailure::new("IA", Some(1), "timeout"),
            RunFailure::new("Baseline", None, "diverged"),
        ];
        let mut buf = Vec::new();
        write_failures(&failures, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "scenario,run_id,reason\nIA,2,timeout\nBaseline,,diverged\n");
    }
}
