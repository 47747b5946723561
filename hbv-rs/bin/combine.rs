use std::env;

use hbv::prelude::*;

pub fn main() {
    use simple_logger::SimpleLogger;
    SimpleLogger::new().init().unwrap();

    let path = env::args().nth(1).unwrap_or_else(|| "conf.toml".into());
    let cfg = Config::load(&path).unwrap();

    let combiner = Combiner::from_config(&cfg);
    for kind in [TableKind::Central, TableKind::Stochastic] {
        for file in combiner.combine(kind).unwrap() {
            println!("{}", file.display());
        }
    }
    println!("{}", combiner.write_summary().unwrap().display());
}
