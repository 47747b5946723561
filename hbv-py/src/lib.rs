use pyo3::{prelude::*, wrap_pyfunction};

extern crate pyo3;
use hbv::params::EstimateRow;
use hbv::sim::read_model_output;
use hbv::prelude as rs;
use hbv::prelude::Year;
use std::collections::BTreeMap;

use pyo3::exceptions::*;
use pythonize::{depythonize, pythonize};

fn to_py_err(e: rs::Error) -> PyErr {
    match e {
        rs::Error::Io(e) => PyIOError::new_err(e.to_string()),
        rs::Error::MissingInput(msg) => PyFileNotFoundError::new_err(msg),
        e => PyValueError::new_err(e.to_string()),
    }
}

fn catalog(toml: Option<&str>) -> PyResult<rs::Catalog> {
    match toml {
        Some(data) => rs::Catalog::from_toml_str(data).map_err(to_py_err),
        None => Ok(rs::Catalog::hbv_default()),
    }
}

/// Draws `runs` values around a list of point estimate rows
/// (`{"parameter", "population", "value"}`) and returns the sample set.
#[pyfunction(runs = "200", seed = "20230906", catalog_toml = "None")]
fn sample_parameters(
    py: Python,
    country: &str,
    estimates: &PyAny,
    runs: usize,
    seed: u64,
    catalog_toml: Option<&str>,
) -> PyResult<PyObject> {
    let rows: Vec<EstimateRow> = depythonize(estimates)?;
    let estimates = rs::PointEstimates::from_rows(country, rows);
    let (samples, _) = rs::sample(&estimates, &catalog(catalog_toml)?, runs, seed);
    Ok(pythonize(py, &samples)?)
}

/// Parameter rows to apply to the model for run `run` (zero-based).
#[pyfunction]
fn run_overrides(py: Python, samples: &PyAny, run: usize) -> PyResult<PyObject> {
    let samples: rs::SampleSet = depythonize(samples)?;
    if run >= samples.run_count() {
        return Err(PyIndexError::new_err(run));
    }
    let strata: Vec<rs::Stratum> = rs::Stratum::all().collect();
    let overrides = rs::SharingTable::hbv_default(&strata).overrides_for_run(&samples, run);
    let rows: Vec<EstimateRow> = overrides.rows().collect();
    Ok(pythonize(py, &rows)?)
}

/// Burden rows of one model output file, split over single-year ages with
/// the country's population.
#[pyfunction(disease = "\"HepB\"", years = "(2000, 2100)", population_years = "(1990, 2100)", run_id = "None")]
fn aggregate_output(
    py: Python,
    country: &str,
    output_csv: &str,
    population_csv: &str,
    disease: &str,
    years: (Year, Year),
    population_years: (Year, Year),
    run_id: Option<u32>,
) -> PyResult<PyObject> {
    let output = read_model_output(std::fs::File::open(output_csv)?).map_err(to_py_err)?;
    output.validate().map_err(to_py_err)?;
    let population =
        rs::PopulationTable::load(population_csv, country, population_years).map_err(to_py_err)?;
    let weights = rs::RedistributionWeights::from_population(&population);

    let records = rs::Aggregator::new(disease, years).records(&output, &weights, run_id);
    Ok(pythonize(py, &records)?)
}

/// Merges per-country burden rows of one scenario, adding zero rows for
/// every country of `placeholders` (code → name) that has none.
#[pyfunction(template = "None", stochastic = "false")]
fn combine_tables(
    py: Python,
    tables: Vec<&PyAny>,
    placeholders: BTreeMap<String, String>,
    template: Option<&str>,
    stochastic: bool,
) -> PyResult<PyObject> {
    let kind = if stochastic {
        rs::TableKind::Stochastic
    } else {
        rs::TableKind::Central
    };
    let mut data = Vec::new();
    for t in tables {
        let records: Vec<rs::BurdenRecord> = depythonize(t)?;
        data.push(rs::BurdenTable::from_records(kind, records));
    }
    let combined = rs::combine_scenario(kind, data, &placeholders, template);
    Ok(pythonize(py, combined.records())?)
}

/// Writes burden rows to `path` with the rounding of the table kind.
#[pyfunction(stochastic = "false")]
fn write_burden_table(rows: &PyAny, path: &str, stochastic: bool) -> PyResult<usize> {
    let records: Vec<rs::BurdenRecord> = depythonize(rows)?;
    let kind = if stochastic {
        rs::TableKind::Stochastic
    } else {
        rs::TableKind::Central
    };
    let mut table = rs::BurdenTable::from_records(kind, records);
    table.sort();
    table.save(path).map_err(to_py_err)?;
    Ok(table.len())
}

#[pymodule]
fn hbvrs(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(sample_parameters, m)?)?;
    m.add_function(wrap_pyfunction!(run_overrides, m)?)?;
    m.add_function(wrap_pyfunction!(aggregate_output, m)?)?;
    m.add_function(wrap_pyfunction!(combine_tables, m)?)?;
    m.add_function(wrap_pyfunction!(write_burden_table, m)?)?;

    Ok(())
}
