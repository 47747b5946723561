use super::ParameterOverrides;
use crate::{
    params::{AgeBin, Sex, Stratum, CALIBRATION_BANDS, CALIBRATION_PREFIXES},
    sampler::SampleSet,
    RunIndex,
};
use getset::*;

/// Applies the draw of a source (parameter, stratum) to a model parameter at
/// every member stratum.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct SharingRule {
    group: String,
    parameter: String,
    source: (String, Stratum),
    members: Vec<Stratum>,
}

impl SharingRule {
    pub fn new(group: &str, parameter: &str, source: (&str, Stratum), members: Vec<Stratum>) -> Self {
        SharingRule {
            group: group.to_string(),
            parameter: parameter.to_string(),
            source: (source.0.to_string(), source.1),
            members,
        }
    }
}

/// Explicit table of which sampled value feeds which (parameter, stratum) of
/// the model in a run.
#[derive(Debug, Clone, PartialEq, Default, Getters)]
pub struct SharingTable {
    #[getset(get = "pub")]
    rules: Vec<SharingRule>,
}

/// Mother-to-child transmission parameters, only defined at birth.
pub const MTCT_PARAMETERS: [&str; 6] = ["ci_p", "eag_hvl", "eag_ve", "hvl_trisk", "sag_ve", "sag_hvl"];

/// Parameters taking a single draw for the whole population.
pub const GLOBAL_PARAMETERS: [&str; 13] = [
    "m_dc", "m_hcc", "te_cc_dc", "te_cc_hcc", "te_dc_cc", "te_dc_hcc", "te_icl_cc", "te_icl_hcc",
    "te_ict_hcc", "te_ie_cc", "te_ie_hcc", "te_m_dc", "te_m_hcc",
];

/// Age bins covered by each calibration band.
pub fn calibration_band_bins(band: &str) -> Vec<AgeBin> {
    use AgeBin as B;
    match band {
        "020" => vec![B::AGE_0, B::AGE_1_4, B::AGE_5_9, B::AGE_10_19],
        "2040" => vec![B::AGE_20_29, B::AGE_30_39],
        "4060" => vec![B::AGE_40_49, B::AGE_50_59],
        "60" => vec![B::AGE_60_69, B::AGE_70_79, B::AGE_80_89, B::AGE_90_PLUS],
        _ => vec![],
    }
}

impl SharingTable {
    pub fn new(rules: Vec<SharingRule>) -> Self {
        SharingTable { rules }
    }

    /// Sharing used for HBV runs over the given model strata.
    ///
    /// * Birth strata take their own draws of the transmission parameters.
    /// * Every calibration factor `{prefix}_{band}_{sex}` takes the draw of
    ///   `{prefix}_020_m` at `0-0M` over the strata of its band and sex.
    /// * Mortality multipliers and treatment efficacies take the `0-0M` draw
    ///   in every stratum.
    ///
    /// Members outside `strata` are dropped, and rules left without members
    /// are not added.
    pub fn hbv_default(strata: &[Stratum]) -> Self {
        let reference = Stratum::male(AgeBin::AGE_0);
        let mut rules = Vec::new();

        for name in MTCT_PARAMETERS {
            for s in [reference, reference.counterpart()] {
                if strata.contains(&s) {
                    rules.push(SharingRule::new("mtct", name, (name, s), vec![s]));
                }
            }
        }

        for band in CALIBRATION_BANDS {
            for sex in [Sex::Male, Sex::Female] {
                let members: Vec<Stratum> = calibration_band_bins(band)
                    .into_iter()
                    .map(|b| Stratum::new(b, sex))
                    .filter(|s| strata.contains(s))
                    .collect();
                if members.is_empty() {
                    continue;
                }
                let tag = if sex == Sex::Male { "m" } else { "f" };
                let group = format!("calibration_{}_{}", band, tag);
                for prefix in CALIBRATION_PREFIXES {
                    let parameter = format!("{}_{}_{}", prefix, band, tag);
                    let source = format!("{}_020_m", prefix);
                    rules.push(SharingRule::new(&group, &parameter, (&source, reference), members.clone()));
                }
            }
        }

        for name in GLOBAL_PARAMETERS {
            if strata.is_empty() {
                break;
            }
            rules.push(SharingRule::new("global", name, (name, reference), strata.to_vec()));
        }

        SharingTable { rules }
    }

    /// Overrides of a single run. Rules whose source was not sampled are
    /// left out, so the model keeps its point estimates there.
    pub fn overrides_for_run(&self, samples: &SampleSet, run: RunIndex) -> ParameterOverrides {
        let mut overrides = ParameterOverrides::new();
        for rule in &self.rules {
            let (name, stratum) = &rule.source;
            if let Some(x) = samples.value(name, *stratum, run) {
                for member in &rule.members {
                    overrides.set(&rule.parameter, *member, x);
                }
            }
        }
        return overrides;
    }

    /// Rules that cannot be applied because their source was not sampled.
    pub fn unresolved<'a>(&'a self, samples: &'a SampleSet) -> impl Iterator<Item = &'a SharingRule> {
        self.rules
            .iter()
            .filter(move |r| !samples.contains(&r.source.0, r.source.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Real;

    fn samples() -> SampleSet {
        let reference = Stratum::male(AgeBin::AGE_0);
        let mut s = SampleSet::new("VNM", 3);
        s.insert("cc_020_m", reference, vec![1.0, 2.0, 3.0]);
        s.insert("cc_2040_f", reference, vec![9.0, 9.0, 9.0]);
        s.insert("te_cc_dc", reference, vec![0.1, 0.2, 0.3]);
        s.insert("ci_p", reference, vec![0.9, 0.91, 0.92]);
        s.insert("ci_p", reference.counterpart(), vec![0.8, 0.81, 0.82]);
        return s;
    }

    #[test]
    fn calibration_groups_share_one_draw() {
        let strata: Vec<Stratum> = Stratum::all().collect();
        let table = SharingTable::hbv_default(&strata);
        let ov = table.overrides_for_run(&samples(), 1);

        for band in CALIBRATION_BANDS {
            for bin in calibration_band_bins(band) {
                assert_eq!(ov.get(&format!("cc_{}_m", band), Stratum::male(bin)), Some(2.0));
                assert_eq!(ov.get(&format!("cc_{}_f", band), Stratum::female(bin)), Some(2.0));
            }
        }
        assert_eq!(ov.get("cc_2040_f", Stratum::male(AgeBin::AGE_20_29)), None);
        assert_eq!(ov.get("cc_2040_m", Stratum::male(AgeBin::AGE_0)), None);
    }

    #[test]
    fn global_and_birth_parameters() {
        let strata: Vec<Stratum> = Stratum::all().collect();
        let table = SharingTable::hbv_default(&strata);
        let ov = table.overrides_for_run(&samples(), 2);

        for s in &strata {
            assert_eq!(ov.get("te_cc_dc", *s), Some(0.3));
        }
        assert_eq!(ov.get("ci_p", Stratum::male(AgeBin::AGE_0)), Some(0.92));
        assert_eq!(ov.get("ci_p", Stratum::female(AgeBin::AGE_0)), Some(0.82));
        assert_eq!(ov.get("ci_p", Stratum::male(AgeBin::AGE_1_4)), None);
        assert_eq!(ov.get("m_dc", Stratum::male(AgeBin::AGE_0)), None);

        // ci_p at birth, cc_* and te_cc_dc at every stratum
        assert_eq!(ov.len(), 2 + 24 + 24);
    }

    #[test]
    fn members_are_limited_to_model_strata() {
        let strata = vec![
            Stratum::male(AgeBin::AGE_0),
            Stratum::male(AgeBin::AGE_20_29),
            Stratum::female(AgeBin::AGE_60_69),
        ];
        let table = SharingTable::hbv_default(&strata);
        assert!(table.rules().iter().all(|r| r.members().iter().all(|m| strata.contains(m))));
        assert!(table.rules().iter().all(|r| !r.members().is_empty()));

        let ov = table.overrides_for_run(&samples(), 0);
        assert_eq!(ov.get("ci_p", Stratum::male(AgeBin::AGE_0)), Some(0.9));
        assert_eq!(ov.get("ci_p", Stratum::female(AgeBin::AGE_0)), None);
        assert_eq!(ov.get("cc_020_m", Stratum::male(AgeBin::AGE_5_9)), None);
        assert_eq!(ov.get("cc_2040_m", Stratum::male(AgeBin::AGE_20_29)), Some(1.0));
        assert_eq!(ov.get("cc_60_f", Stratum::female(AgeBin::AGE_60_69)), Some(1.0));
        // ci_p at 0-0M, cc_* and te_cc_dc at the three strata
        assert_eq!(ov.len(), 1 + 3 + 3);
    }

    #[test]
    fn unsampled_sources_are_reported() {
        let table = SharingTable::hbv_default(&[Stratum::male(AgeBin::AGE_0)]);
        let s = samples();
        let unresolved: Vec<&SharingRule> = table.unresolved(&s).collect();
        assert!(unresolved.iter().any(|r| r.parameter() == "m_dc"));
        assert!(unresolved.iter().all(|r| r.parameter() != "te_cc_dc"));
        let total: Real = table.overrides_for_run(&s, 0).iter().map(|(_, _, v)| v).sum();
        assert!(total > 0.0);
    }
}
