use crate::{
    error::Result,
    params::{AgeBin, PointEstimates, Sex, Stratum},
    sampler::SampleSet,
    Real,
};
use getset::*;
use std::{io, path::Path};

const REFERENCE: Stratum = Stratum::male(AgeBin::AGE_0);

/// A column of the sampled-inputs table.
///
/// The value of a run is the draw of `parameter` at the reference stratum,
/// optionally complemented (`1 - x`) and multiplied by point estimates of
/// other model parameters.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct InputColumn {
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    parameter: String,
    #[getset(get_copy = "pub")]
    complement: bool,
    #[getset(get = "pub")]
    scales: Vec<(String, Stratum)>,
}

impl InputColumn {
    pub fn sampled(name: &str, parameter: &str) -> Self {
        InputColumn {
            name: name.to_string(),
            parameter: parameter.to_string(),
            complement: false,
            scales: vec![],
        }
    }

    /// Report `1 - x`, the way treatment efficacies are published.
    pub fn complemented(name: &str, parameter: &str) -> Self {
        InputColumn {
            complement: true,
            ..InputColumn::sampled(name, parameter)
        }
    }

    pub fn scaled_by(mut self, parameter: &str, stratum: Stratum) -> Self {
        self.scales.push((parameter.to_string(), stratum));
        return self;
    }

    /// Value for a run, or None when the draw or any scale factor is absent.
    pub fn value(&self, samples: &SampleSet, estimates: &PointEstimates, run: usize) -> Option<Real> {
        let mut x = samples.value(&self.parameter, REFERENCE, run)?;
        if self.complement {
            x = 1.0 - x;
        }
        for (name, stratum) in &self.scales {
            x *= estimates.get(name, *stratum)?;
        }
        Some(x)
    }
}

fn m(bin: AgeBin) -> Stratum {
    Stratum::male(bin)
}

fn f(bin: AgeBin) -> Stratum {
    Stratum::female(bin)
}

/// Columns scaled by the baseline HCC progression and a relative risk over
/// the seven reporting groups `5_14, 15_49M/F, 50_69M/F, 70+M/F`.
fn hcc_risk_columns(transition: &str, rr: &str) -> Vec<InputColumn> {
    let groups = [
        ("5_14", m(AgeBin::AGE_5_9)),
        ("15_49M", m(AgeBin::AGE_20_29)),
        ("15_49F", f(AgeBin::AGE_20_29)),
        ("50_69M", m(AgeBin::AGE_50_59)),
        ("50_69F", f(AgeBin::AGE_50_59)),
        ("70+M", m(AgeBin::AGE_70_79)),
        ("70+F", f(AgeBin::AGE_70_79)),
    ];
    groups
        .iter()
        .map(|(group, stratum)| {
            InputColumn::sampled(&format!("{}_{}", group, transition), "hcc_020_m")
                .scaled_by("dc_hcc_in", m(AgeBin::AGE_50_59))
                .scaled_by(rr, *stratum)
        })
        .collect()
}

/// The inputs published alongside the stochastic burden estimates.
pub fn hbv_input_columns() -> Vec<InputColumn> {
    use AgeBin as B;

    let mut cols = vec![
        InputColumn::sampled("ve_eag", "eag_ve"),
        InputColumn::sampled("ve_sag", "sag_ve"),
        InputColumn::sampled("eag_hvl", "eag_hvl"),
        InputColumn::sampled("sag_hvl", "sag_hvl"),
        InputColumn::sampled("hvl_trans", "hvl_trisk"),
        InputColumn::sampled("mtct_chronic", "ci_p"),
        InputColumn::sampled("dc_death", "m_dc"),
    ];

    for te in [
        "te_cc_dc", "te_cc_hcc", "te_dc_cc", "te_dc_hcc", "te_icl_cc", "te_icl_hcc",
        "te_ict_hcc", "te_ie_cc", "te_ie_hcc", "te_m_dc", "te_m_hcc",
    ] {
        cols.push(InputColumn::complemented(te, te));
    }

    let four_groups = [
        ("0_4", m(B::AGE_0)),
        ("5_14", m(B::AGE_5_9)),
        ("15_49", m(B::AGE_20_29)),
        ("50+", m(B::AGE_50_59)),
    ];
    for (group, s) in four_groups {
        cols.push(InputColumn::sampled(&format!("{}_it_icl", group), "eag_020_m").scaled_by("it_icl_in", s));
    }
    for (group, s) in &four_groups[1..] {
        cols.push(
            InputColumn::sampled(&format!("{}_it_hcc", group), "hcc_020_m")
                .scaled_by("dc_hcc_in", m(B::AGE_50_59))
                .scaled_by("rr_it_hcc", *s),
        );
    }
    for (group, s) in four_groups {
        cols.push(InputColumn::sampled(&format!("{}_icl_ict", group), "eag_020_m").scaled_by("icl_ict_in", s));
    }

    let sexed_groups = [
        ("0_14", B::AGE_0),
        ("15_49", B::AGE_20_29),
        ("50+", B::AGE_50_59),
    ];
    for (group, bin) in sexed_groups {
        for sex in [Sex::Male, Sex::Female] {
            let s = Stratum::new(bin, sex);
            cols.push(
                InputColumn::sampled(&format!("{}{}_icl_cc", group, sex.suffix()), "cc_020_m")
                    .scaled_by("ie_cc_in", s)
                    .scaled_by("rr_icl_cc", s),
            );
        }
    }

    let icl_hcc = [
        ("5_14", m(B::AGE_5_9)),
        ("15_49M", m(B::AGE_20_29)),
        ("15_49F", f(B::AGE_20_29)),
        ("50+M", m(B::AGE_50_59)),
        ("50+F", f(B::AGE_50_59)),
    ];
    for (group, s) in icl_hcc {
        cols.push(
            InputColumn::sampled(&format!("{}_icl_hcc", group), "hcc_020_m")
                .scaled_by("dc_hcc_in", m(B::AGE_50_59))
                .scaled_by("rr_icl_hcc", s),
        );
    }

    for (group, s) in [("0_14", m(B::AGE_0)), ("15_49", m(B::AGE_20_29)), ("50+", m(B::AGE_50_59))] {
        cols.push(InputColumn::sampled(&format!("{}_ict_ie", group), "sag_020_m").scaled_by("ict_ie_in", s));
    }
    for (group, s) in four_groups {
        cols.push(
            InputColumn::sampled(&format!("{}_ict_icl", group), "sag_020_m")
                .scaled_by("it_icl_in", s)
                .scaled_by("rr_ict_icl", s),
        );
    }

    cols.extend(hcc_risk_columns("ict_hcc", "rr_ict_hcc"));

    let ie_cc = [
        ("0_14", B::AGE_0),
        ("15_49", B::AGE_20_29),
        ("50_69", B::AGE_50_59),
        ("70+", B::AGE_70_79),
    ];
    for (group, bin) in ie_cc {
        for sex in [Sex::Male, Sex::Female] {
            cols.push(
                InputColumn::sampled(&format!("{}{}_ie_cc", group, sex.suffix()), "cc_020_m")
                    .scaled_by("ie_cc_in", Stratum::new(bin, sex)),
            );
        }
    }

    cols.extend(hcc_risk_columns("ie_hcc", "rr_ie_hcc"));
    cols.extend(hcc_risk_columns("cc_hcc", "rr_cc_hcc"));

    cols.push(InputColumn::sampled("5+_dc_hcc", "hcc_020_m").scaled_by("dc_hcc_in", m(B::AGE_50_59)));
    cols.push(InputColumn::sampled("5+_hcc_death", "m_hcc"));
    return cols;
}

/// Per-run values of the published inputs, one row per `run_id`.
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct InputsTable {
    columns: Vec<String>,
    rows: Vec<(u32, Vec<Option<Real>>)>,
}

impl InputsTable {
    pub fn build(samples: &SampleSet, estimates: &PointEstimates, columns: &[InputColumn]) -> Self {
        let rows = (0..samples.run_count())
            .map(|run| {
                let values = columns
                    .iter()
                    .map(|c| c.value(samples, estimates, run))
                    .collect();
                ((run + 1) as u32, values)
            })
            .collect();
        InputsTable {
            columns: columns.iter().map(|c| c.name().clone()).collect(),
            rows,
        }
    }

    /// Write as CSV with `run_id` first. Missing values are empty cells.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["run_id".to_string()];
        header.extend(self.columns.iter().cloned());
        wtr.write_record(&header)?;

        for (run_id, values) in &self.rows {
            let mut row = vec![run_id.to_string()];
            row.extend(values.iter().map(|v| v.map(|x| x.to_string()).unwrap_or_default()));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn column_layout() {
        let cols = hbv_input_columns();
        assert_eq!(cols.len(), 78);
        assert_eq!(cols[0].name(), "ve_eag");
        assert_eq!(cols.last().unwrap().name(), "5+_hcc_death");

        let mut names: Vec<&String> = cols.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), cols.len());
    }

    #[test]
    fn derived_values() {
        let mut samples = SampleSet::new("VNM", 2);
        samples.insert("te_cc_dc", REFERENCE, vec![0.2, 0.1]);
        samples.insert("eag_020_m", REFERENCE, vec![2.0, 3.0]);
        samples.insert("hcc_020_m", REFERENCE, vec![1.5, 1.0]);

        let mut pe = PointEstimates::new("VNM");
        pe.insert("it_icl_in", REFERENCE, 0.01);
        pe.insert("dc_hcc_in", m(AgeBin::AGE_50_59), 0.02);
        pe.insert("rr_it_hcc", m(AgeBin::AGE_5_9), 0.5);

        let cols = hbv_input_columns();
        let table = InputsTable::build(&samples, &pe, &cols);
        let col = |name: &str| table.columns().iter().position(|c| c == name).unwrap();

        let (run_id, row) = &table.rows()[1];
        assert_eq!(*run_id, 2);
        assert_approx_eq!(row[col("te_cc_dc")].unwrap(), 0.9);
        assert_approx_eq!(row[col("0_4_it_icl")].unwrap(), 0.03);
        assert_approx_eq!(row[col("5_14_it_hcc")].unwrap(), 0.01);
        assert_eq!(row[col("5_14_it_icl")], None);
        assert_eq!(row[col("ve_eag")], None);

        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("run_id,ve_eag,ve_sag"));
        assert_eq!(text.lines().count(), 3);
    }
}
