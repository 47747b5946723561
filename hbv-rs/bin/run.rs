use std::{env, process};

use hbv::{pipeline::run_all, prelude::*};
use log::*;

pub fn main() {
    use simple_logger::SimpleLogger;
    SimpleLogger::new().init().unwrap();

    let path = env::args().nth(1).unwrap_or_else(|| "conf.toml".into());
    let cfg = match Config::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("cannot read {}: {}", path, e);
            process::exit(2);
        }
    };
    if cfg.model_command().is_empty() {
        error!("{}: `model_command` is not set", path);
        process::exit(2);
    }
    info!(
        "{} countries, {} scenarios, {} runs each",
        cfg.countries().len(),
        cfg.scenarios().len(),
        cfg.runs()
    );

    let make_model = |country: &str| {
        CommandModel::new(country, cfg.model_command(), cfg.work_dir()).map(|m| m.with_timeout(cfg.timeout()))
    };
    let reports = run_all(&cfg, make_model).unwrap();

    let mut failed = 0;
    for (country, report) in &reports {
        match report {
            Ok(r) => println!("{}: {} files, {} failed runs", country, r.files().len(), r.failures().len()),
            Err(e) => {
                failed += 1;
                println!("{}: FAILED ({})", country, e);
            }
        }
    }
    if failed > 0 {
        process::exit(1);
    }
}
