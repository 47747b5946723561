use crate::{
    error::Result,
    params::Catalog,
    scenarios::{default_sources, default_vaccine_map, ScenarioSource},
    Year,
};
use getset::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Process-wide settings of a submission run, usually read from `conf.toml`.
/// Every field is optional in the file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Getters, CopyGetters, Setters)]
#[serde(default)]
pub struct Config {
    /// Number of stochastic draws per country.
    #[getset(get_copy = "pub", set = "pub")]
    runs: usize,
    #[getset(get_copy = "pub", set = "pub")]
    seed: u64,
    #[getset(get = "pub")]
    disease: String,

    /// Years simulated by the model, inclusive.
    #[getset(get_copy = "pub", set = "pub")]
    model_years: (Year, Year),
    /// Years kept in burden tables, inclusive.
    #[getset(get_copy = "pub", set = "pub")]
    output_years: (Year, Year),
    /// Years read from population files, inclusive.
    #[getset(get_copy = "pub", set = "pub")]
    population_years: (Year, Year),

    #[getset(get = "pub", set = "pub")]
    input_dir: PathBuf,
    #[getset(get = "pub", set = "pub")]
    output_dir: PathBuf,
    /// Scratch space of the command model.
    #[getset(get = "pub", set = "pub")]
    work_dir: PathBuf,
    /// Parameter catalog in TOML. The built-in HBV catalog is used if unset.
    #[getset(get = "pub")]
    catalog_file: Option<PathBuf>,

    /// Wall-clock limit of one model execution in seconds.
    #[getset(get_copy = "pub", set = "pub")]
    timeout_secs: Option<u64>,
    /// Size of the country worker pool. Defaults to the rayon global pool.
    #[getset(get_copy = "pub", set = "pub")]
    threads: Option<usize>,

    #[getset(get = "pub", set = "pub")]
    countries: Vec<String>,
    #[getset(get = "pub")]
    scenarios: Vec<ScenarioSource>,
    /// Coverage file vaccine name → model parameter.
    #[getset(get = "pub")]
    vaccines: BTreeMap<String, String>,

    /// Countries without a model, filled with zero rows in combined files.
    #[getset(get = "pub")]
    missing_countries: BTreeMap<String, String>,
    /// Names of modelled countries, used when their files are absent.
    #[getset(get = "pub", set = "pub")]
    country_names: BTreeMap<String, String>,
    /// Country code → WHO region.
    #[getset(get = "pub", set = "pub")]
    regions: BTreeMap<String, String>,
    /// Country whose rows are cloned to build placeholders.
    #[getset(get = "pub", set = "pub")]
    template_country: Option<String>,

    /// Program and arguments of the external model.
    #[getset(get = "pub", set = "pub")]
    model_command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let missing = [
            ("DMA", "Dominica"),
            ("GRD", "Grenada"),
            ("LCA", "Saint Lucia"),
            ("MDV", "Maldives"),
            ("MHL", "Marshall Islands"),
            ("NAM", "Namibia"),
            ("PSE", "Palestine, State of"),
            ("TUV", "Tuvalu"),
            ("VCT", "Saint Vincent and the Grenadines"),
            ("XK", "Kosovo"),
        ];
        Config {
            runs: 200,
            seed: 20230906,
            disease: "HepB".into(),
            model_years: (1990, 2100),
            output_years: (2000, 2100),
            population_years: (1990, 2100),
            input_dir: "inputs".into(),
            output_dir: PathBuf::from("outputs").join("vimc_outs"),
            work_dir: PathBuf::from("outputs").join("work"),
            catalog_file: None,
            timeout_secs: Some(1800),
            threads: None,
            countries: vec![],
            scenarios: default_sources(),
            vaccines: default_vaccine_map(),
            missing_countries: missing
                .iter()
                .map(|(c, n)| (c.to_string(), n.to_string()))
                .collect(),
            country_names: BTreeMap::new(),
            regions: BTreeMap::new(),
            template_country: Some("EGY".into()),
            model_command: vec![],
        }
    }
}

impl Config {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Config::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// The configured catalog, or the built-in one.
    pub fn load_catalog(&self) -> Result<Catalog> {
        match &self.catalog_file {
            Some(path) => Catalog::load(path),
            None => Ok(Catalog::hbv_default()),
        }
    }

    /// `<input_dir>/<country>/<country>_estimates.csv`
    pub fn estimates_path(&self, country: &str) -> PathBuf {
        self.input_dir
            .join(country)
            .join(format!("{}_estimates.csv", country))
    }

    /// `<input_dir>/<country>/<country>_pop.csv`
    pub fn population_path(&self, country: &str) -> PathBuf {
        self.input_dir.join(country).join(format!("{}_pop.csv", country))
    }

    /// Display name of a country if any table knows it.
    pub fn country_name(&self, country: &str) -> Option<&String> {
        self.country_names
            .get(country)
            .or_else(|| self.missing_countries.get(country))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let conf = Config::default();
        assert_eq!(conf.runs(), 200);
        assert_eq!(conf.seed(), 20230906);
        assert_eq!(conf.output_years(), (2000, 2100));
        assert_eq!(conf.timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(conf.missing_countries().len(), 10);
        assert_eq!(conf.scenarios().len(), 7);
        assert_eq!(
            conf.population_path("VNM"),
            PathBuf::from("inputs").join("VNM").join("VNM_pop.csv")
        );
    }

    #[test]
    fn partial_toml() {
        let conf = Config::from_toml_str(
            r#"
            runs = 5
            countries = ["VNM", "EGY"]
            model_command = ["python", "run_model.py"]

            [regions]
            VNM = "WPR"
            "#,
        )
        .unwrap();
        assert_eq!(conf.runs(), 5);
        assert_eq!(conf.countries().len(), 2);
        assert_eq!(conf.regions().get("VNM").unwrap(), "WPR");
        assert_eq!(conf.seed(), 20230906);
        assert_eq!(conf.disease(), "HepB");
        assert!(conf.load_catalog().unwrap().len() > 0);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(Config::from_toml_str("runs = \"many\"").is_err());
    }
}
