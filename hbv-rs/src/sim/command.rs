use super::{ExternalModel, ModelOutput, ParameterOverrides};
use crate::{
    error::{Error, Result},
    output::{BurdenMetric, WideTable},
    params::AgeBin,
    scenarios::Scenario,
    Real, Year,
};
use getset::*;
use log::*;
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

static CALL_COUNTER: AtomicUsize = AtomicUsize::new(0);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs the disease model as an external program.
///
/// Each execution writes the overrides and the scenario coverage to CSV
/// files in the work directory and invokes
///
/// ```text
/// <program> <args...> --country <code> --scenario <name>
///     --overrides <file> --coverage <file> --output <file>
/// ```
///
/// The program must write a table with columns `output, year` followed by one
/// column per age bin (see [`read_model_output`]) and exit with status 0.
/// With a timeout, a program still running at the deadline is killed.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct CommandModel {
    #[getset(get = "pub")]
    country: String,
    #[getset(get = "pub")]
    program: String,
    #[getset(get = "pub")]
    args: Vec<String>,
    #[getset(get = "pub")]
    work_dir: PathBuf,
    #[getset(get_copy = "pub")]
    timeout: Option<Duration>,
}

impl CommandModel {
    pub fn new(country: &str, command: &[String], work_dir: impl AsRef<Path>) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::MissingInput("empty model command".into()))?;
        Ok(CommandModel {
            country: country.to_string(),
            program: program.clone(),
            args: args.to_vec(),
            work_dir: work_dir.as_ref().to_path_buf(),
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        return self;
    }

    fn scratch(&self, scenario: &Scenario) -> [PathBuf; 3] {
        let n = CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let stem = format!("{}_{}_{}_{}", self.country, scenario.id(), std::process::id(), n);
        [
            self.work_dir.join(format!("{}_overrides.csv", stem)),
            self.work_dir.join(format!("{}_coverage.csv", stem)),
            self.work_dir.join(format!("{}_output.csv", stem)),
        ]
    }

    fn invoke(&self, scenario: &Scenario, files: &[PathBuf; 3]) -> Result<ModelOutput> {
        let [overrides, coverage, output] = files;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--country")
            .arg(&self.country)
            .arg("--scenario")
            .arg(scenario.name())
            .arg("--overrides")
            .arg(overrides)
            .arg("--coverage")
            .arg(coverage)
            .arg("--output")
            .arg(output)
            .spawn()?;
        let status = match self.timeout {
            Some(t) => wait_deadline(&mut child, t)?,
            None => child.wait()?,
        };
        if !status.success() {
            return Err(Error::ModelFailed(format!("{} exited with {}", self.program, status)));
        }
        read_model_output(fs::File::open(output)?)
    }
}

impl ExternalModel for CommandModel {
    fn execute(&self, scenario: &Scenario, overrides: &ParameterOverrides) -> Result<ModelOutput> {
        fs::create_dir_all(&self.work_dir)?;
        let files = self.scratch(scenario);
        overrides.write_csv(io::BufWriter::new(fs::File::create(&files[0])?))?;
        write_coverage(scenario, io::BufWriter::new(fs::File::create(&files[1])?))?;

        let result = self.invoke(scenario, &files);
        for f in files.iter() {
            if let Err(e) = fs::remove_file(f) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(target: "runs", "cannot remove {}: {}", f.display(), e);
                }
            }
        }
        return result;
    }
}

/// Wait for `child`, killing it once `timeout` has elapsed.
fn wait_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                debug!(target: "runs", "cannot kill model process {}: {}", child.id(), e);
            }
            child.wait()?;
            return Err(Error::RunTimeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Write scenario coverage as `parameter,population,year,value` rows.
pub fn write_coverage<W: io::Write>(scenario: &Scenario, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&["parameter", "population", "year", "value"])?;
    for series in scenario.coverage() {
        for stratum in series.strata() {
            for (year, value) in series.points() {
                wtr.write_record(&[
                    series.parameter().clone(),
                    stratum.to_string(),
                    year.to_string(),
                    value.to_string(),
                ])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Parse a wide model output table.
///
/// Each row holds one year of one output series: the series name (model name
/// such as `tot_inc` or table column such as `cases`), the year and then one
/// value per age bin, with bins identified by their header labels. Unknown
/// series are ignored.
pub fn read_model_output<R: io::Read>(reader: R) -> Result<ModelOutput> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let output_col = position("output")
        .ok_or_else(|| Error::MalformedOutput("no `output` column".into()))?;
    let year_col = position("year")
        .ok_or_else(|| Error::MalformedOutput("no `year` column".into()))?;
    let mut bin_cols = [0; AgeBin::COUNT];
    for bin in AgeBin::all() {
        bin_cols[bin.index()] = position(bin.label())
            .ok_or_else(|| Error::MalformedOutput(format!("no `{}` column", bin)))?;
    }

    let mut series: BTreeMap<BurdenMetric, Vec<(Year, [Real; AgeBin::COUNT])>> = BTreeMap::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        let metric = match BurdenMetric::from_name(field(output_col)) {
            Some(m) => m,
            None => continue,
        };
        let bad = |what: &str| Error::MalformedOutput(format!("row {}: bad {}", line + 2, what));
        let year: Year = field(year_col).parse().map_err(|_| bad("year"))?;
        let mut row = [0.0; AgeBin::COUNT];
        for bin in AgeBin::all() {
            row[bin.index()] = field(bin_cols[bin.index()])
                .parse()
                .map_err(|_| bad(bin.label()))?;
        }
        series.entry(metric).or_default().push((year, row));
    }

    let mut tables = Vec::new();
    for (metric, mut rows) in series {
        rows.sort_by_key(|r| r.0);
        tables.push((metric, WideTable::from_rows(rows)));
    }
    let years = tables
        .first()
        .map(|(_, t)| t.years().clone())
        .unwrap_or_default();
    let mut result = ModelOutput::new(years);
    for (metric, table) in tables {
        result.insert(metric, table);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Stratum;
    use crate::scenarios::CoverageSeries;

    fn output_csv() -> String {
        let mut text = String::from("output,year,0-0,1-4,5-9,10-19,20-29,30-39,40-49,50-59,60-69,70-79,80-89,90+\n");
        for name in ["alive", "tot_inc", ":dd_hbv", "dalys", "yll", "prev"] {
            for year in [2001, 2000] {
                text.push_str(&format!("{},{},1,2,3,4,5,6,7,8,9,10,11,12\n", name, year));
            }
        }
        return text;
    }

    #[test]
    fn parse_wide_output() {
        let out = read_model_output(output_csv().as_bytes()).unwrap();
        assert!(out.validate().is_ok());
        assert_eq!(out.years(), &vec![2000, 2001]);
        let deaths = out.table(BurdenMetric::Deaths).unwrap();
        assert_eq!(deaths.get(2001, AgeBin::AGE_90_PLUS), Some(12.0));
    }

    #[test]
    fn missing_bin_column() {
        let text = "output,year,0-0\nalive,2000,1\n";
        assert!(matches!(read_model_output(text.as_bytes()), Err(Error::MalformedOutput(_))));
    }

    #[test]
    fn coverage_rows() {
        let series = CoverageSeries::new(
            "bd",
            &[Stratum::male(AgeBin::AGE_0), Stratum::female(AgeBin::AGE_0)],
            vec![(1990, 0.1), (1991, 0.2)],
        );
        let scenario = Scenario::new("Baseline", "hepb-hepb3-bd-default", vec![series]);
        let mut buf = Vec::new();
        write_coverage(&scenario, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("bd,0-0F,1991,0.2"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_error() {
        let dir = std::env::temp_dir().join("hbv-command-model");
        let model = CommandModel::new("VNM", &["false".to_string()], &dir).unwrap();
        let scenario = Scenario::new("Baseline", "hepb-hepb3-bd-default", vec![]);
        let res = model.execute(&scenario, &ParameterOverrides::new());
        assert!(matches!(res, Err(Error::ModelFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn hung_command_is_killed_at_deadline() {
        let dir = std::env::temp_dir().join(format!("hbv-command-hung-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let pid_file = dir.join("model.pid");
        let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
        let command = vec!["sh".to_string(), "-c".to_string(), script];
        let model = CommandModel::new("VNM", &command, &dir)
            .unwrap()
            .with_timeout(Some(Duration::from_millis(300)));
        let scenario = Scenario::new("Baseline", "hepb-hepb3-bd-default", vec![]);

        let start = Instant::now();
        let res = model.execute(&scenario, &ParameterOverrides::new());
        assert!(matches!(res, Err(Error::RunTimeout(_))));
        assert!(start.elapsed() < Duration::from_secs(10));

        let pid = fs::read_to_string(&pid_file).unwrap();
        let alive = Command::new("kill").arg("-0").arg(pid.trim()).status().unwrap();
        assert!(!alive.success());

        // only the pid file is left, scratch files are gone
        let left: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(left.len(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }
}
