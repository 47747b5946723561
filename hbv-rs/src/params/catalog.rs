use crate::{
    error::{Error, Result},
    Real,
};
use getset::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

// Default bounds relative to the point estimate
const LOWER_FACTOR: Real = 0.7;
const UPPER_FACTOR: Real = 1.3;
const BOUNDS_TO_STD_DEV: Real = 4.0;

/// Grouping of sampled parameters. Efficacy categories are assumed not to
/// differ by sex.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NaturalHistory,
    TreatmentEfficacy,
    VaccineEfficacy,
    Calibration,
}

impl Category {
    /// Female samples are copies of the male ones for these categories.
    pub fn is_sex_shared(self) -> bool {
        matches!(self, Category::TreatmentEfficacy | Category::VaccineEfficacy)
    }
}

/// Declared value kind of a parameter, which selects its sampling
/// distribution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Probability,
    Proportion,
    Rate,
    #[serde(alias = "number")]
    Count,
}

impl ValueKind {
    /// Probabilities and proportions can never exceed 1.
    pub fn is_unit_bounded(self) -> bool {
        matches!(self, ValueKind::Probability | ValueKind::Proportion)
    }
}

/// A sampled parameter with optional explicit bounds and standard deviation.
/// Missing values are derived from the point estimate by
/// [`ParameterSpec::resolve`].
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[getset(get = "pub")]
    name: String,

    #[getset(get_copy = "pub")]
    category: Category,

    #[getset(get_copy = "pub")]
    kind: ValueKind,

    #[getset(get_copy = "pub")]
    #[serde(default)]
    lower_bound: Option<Real>,

    #[getset(get_copy = "pub")]
    #[serde(default)]
    upper_bound: Option<Real>,

    #[getset(get_copy = "pub")]
    #[serde(default)]
    std_dev: Option<Real>,
}

/// Bounds and spread of a parameter once defaults are applied.
#[derive(Debug, Copy, Clone, PartialEq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ResolvedBounds {
    lower: Real,
    upper: Real,
    std_dev: Real,
}

impl ParameterSpec {
    pub fn new(name: &str, category: Category, kind: ValueKind) -> Self {
        ParameterSpec {
            name: name.to_string(),
            category,
            kind,
            lower_bound: None,
            upper_bound: None,
            std_dev: None,
        }
    }

    pub fn with_bounds(mut self, lower: Real, upper: Real) -> Self {
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        return self;
    }

    pub fn with_std_dev(mut self, std_dev: Real) -> Self {
        self.std_dev = Some(std_dev);
        return self;
    }

    /// Fill missing bounds from the point estimate.
    ///
    /// The lower bound defaults to 70% of the estimate and the upper bound to
    /// 130% (capped at 1 for probabilities and proportions). The standard
    /// deviation defaults to a quarter of the bound width. Negative estimates
    /// produce swapped defaults, which are put back in order. Bounds of
    /// probabilities and proportions always end up inside [0, 1].
    pub fn resolve(&self, point_estimate: Real) -> ResolvedBounds {
        let mut lower = self.lower_bound.unwrap_or(LOWER_FACTOR * point_estimate);
        let mut upper = self.upper_bound.unwrap_or_else(|| {
            let upper = UPPER_FACTOR * point_estimate;
            if self.kind.is_unit_bounded() {
                upper.min(1.0)
            } else {
                upper
            }
        });
        if lower > upper {
            std::mem::swap(&mut lower, &mut upper);
        }
        if self.kind.is_unit_bounded() {
            lower = lower.max(0.0).min(1.0);
            upper = upper.max(0.0).min(1.0);
        }
        let std_dev = self
            .std_dev
            .unwrap_or((upper - lower) / BOUNDS_TO_STD_DEV);
        ResolvedBounds {
            lower,
            upper,
            std_dev,
        }
    }

    /// Check that a point estimate can be sampled around: it must be finite,
    /// and inside [0, 1] for probabilities and proportions.
    pub fn check_estimate(&self, point_estimate: Real) -> Result<()> {
        let invalid = |reason: String| Error::InvalidSpec {
            name: self.name.clone(),
            reason,
        };
        if !point_estimate.is_finite() {
            return Err(invalid(format!("point estimate is {}", point_estimate)));
        }
        if self.kind.is_unit_bounded() && !(0.0..=1.0).contains(&point_estimate) {
            return Err(invalid(format!("point estimate {} outside [0, 1]", point_estimate)));
        }
        Ok(())
    }

    /// Check explicit values for consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidSpec {
            name: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("empty name".into()));
        }
        if let (Some(lo), Some(hi)) = (self.lower_bound, self.upper_bound) {
            if lo > hi {
                return Err(invalid(format!("lower bound {} above upper bound {}", lo, hi)));
            }
        }
        if let Some(hi) = self.upper_bound {
            if self.kind.is_unit_bounded() && hi > 1.0 {
                return Err(invalid(format!("upper bound {} above 1", hi)));
            }
        }
        if let Some(sd) = self.std_dev {
            if !(sd >= 0.0) {
                return Err(invalid(format!("negative standard deviation {}", sd)));
            }
        }
        Ok(())
    }
}

/// The static table of sampled parameters. Order matters: parameters are
/// drawn in catalog order, which makes seeded sampling reproducible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(rename = "parameter", default)]
    specs: Vec<ParameterSpec>,
}

impl Catalog {
    /// Create catalog from specs, rejecting inconsistent entries and
    /// duplicate names.
    pub fn new(specs: Vec<ParameterSpec>) -> Result<Self> {
        for (i, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(Error::InvalidSpec {
                    name: spec.name.clone(),
                    reason: "declared twice".into(),
                });
            }
        }
        Ok(Catalog { specs })
    }

    /// Parse catalog from a TOML document with one `[[parameter]]` table per
    /// spec.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let raw: Catalog = toml::from_str(data)?;
        Catalog::new(raw.specs)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Catalog::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.specs.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Names of parameters whose female samples mirror the male ones.
    pub fn sex_shared(&self) -> impl Iterator<Item = &str> {
        self.specs
            .iter()
            .filter(|s| s.category.is_sex_shared())
            .map(|s| s.name.as_str())
    }

    /// The parameters sampled for the HBV VIMC runs.
    pub fn hbv_default() -> Self {
        use Category::*;
        use ValueKind::*;

        let mut specs = vec![
            ParameterSpec::new("ci_p", NaturalHistory, Proportion).with_bounds(0.84, 0.93),
            ParameterSpec::new("m_dc", NaturalHistory, Probability).with_bounds(0.16, 0.5),
            ParameterSpec::new("m_hcc", NaturalHistory, Probability).with_bounds(0.3, 0.7),
        ];

        let treatment = [
            ("te_dc_cc", 0.1, 0.25),
            ("te_icl_cc", 0.1, 0.4),
            ("te_cc_dc", 0.35, 0.75),
            ("te_cc_hcc", 0.5, 0.85),
            ("te_ie_cc", 0.1, 0.4),
            ("te_m_dc", 0.25, 0.7),
            ("te_m_hcc", 0.5, 1.0),
            ("te_ict_hcc", 0.05, 0.5),
            ("te_ie_hcc", 0.05, 0.5),
            ("te_icl_hcc", 0.05, 0.5),
            ("te_dc_hcc", 0.5, 0.85),
        ];
        for (name, lo, hi) in treatment {
            specs.push(ParameterSpec::new(name, TreatmentEfficacy, Probability).with_bounds(lo, hi));
        }

        let vaccine = [
            ("eag_ve", Probability, 0.6, 0.9),
            ("sag_ve", Probability, 0.85, 1.0),
            ("eag_hvl", Proportion, 0.84, 0.96),
            ("sag_hvl", Proportion, 0.05, 0.16),
            ("hvl_trisk", Proportion, 0.7, 1.0),
        ];
        for (name, kind, lo, hi) in vaccine {
            specs.push(ParameterSpec::new(name, VaccineEfficacy, kind).with_bounds(lo, hi));
        }

        for prefix in CALIBRATION_PREFIXES {
            for band in CALIBRATION_BANDS {
                for sex in ["m", "f"] {
                    let name = format!("{}_{}_{}", prefix, band, sex);
                    specs.push(ParameterSpec::new(&name, Calibration, Count));
                }
            }
        }

        Catalog { specs }
    }
}

/// Transition groups that carry an age-band calibration factor.
pub const CALIBRATION_PREFIXES: [&str; 4] = ["eag", "sag", "cc", "hcc"];

/// Age bands of the calibration factors, as used in parameter names.
pub const CALIBRATION_BANDS: [&str; 4] = ["020", "2040", "4060", "60"];

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn default_bounds_follow_point_estimate() {
        let spec = ParameterSpec::new("x", Category::Calibration, ValueKind::Count);
        let b = spec.resolve(2.0);
        assert_approx_eq!(b.lower(), 1.4);
        assert_approx_eq!(b.upper(), 2.6);
        assert_approx_eq!(b.std_dev(), 0.3);
    }

    #[test]
    fn probability_upper_bound_is_capped() {
        let spec = ParameterSpec::new("p", Category::NaturalHistory, ValueKind::Probability);
        let b = spec.resolve(0.9);
        assert_approx_eq!(b.lower(), 0.63);
        assert_eq!(b.upper(), 1.0);

        let rate = ParameterSpec::new("r", Category::NaturalHistory, ValueKind::Rate);
        assert_approx_eq!(rate.resolve(0.9).upper(), 1.17);
    }

    #[test]
    fn explicit_values_win() {
        let spec = ParameterSpec::new("te", Category::TreatmentEfficacy, ValueKind::Probability)
            .with_bounds(0.1, 0.25)
            .with_std_dev(0.01);
        let b = spec.resolve(0.15);
        assert_eq!((b.lower(), b.upper(), b.std_dev()), (0.1, 0.25, 0.01));
    }

    #[test]
    fn negative_estimates_keep_bounds_ordered() {
        let spec = ParameterSpec::new("x", Category::Calibration, ValueKind::Count);
        let b = spec.resolve(-1.0);
        assert!(b.lower() < b.upper());
        assert!(b.std_dev() > 0.0);
    }

    #[test]
    fn unit_bounds_stay_in_unit_interval() {
        let spec = ParameterSpec::new("p", Category::NaturalHistory, ValueKind::Probability);
        let b = spec.resolve(1.5);
        assert!(b.lower() <= b.upper());
        assert_eq!(b.upper(), 1.0);
        assert!(spec.check_estimate(1.5).is_err());
        assert!(spec.check_estimate(-0.1).is_err());
        assert!(spec.check_estimate(Real::NAN).is_err());
        assert!(spec.check_estimate(1.0).is_ok());

        let count = ParameterSpec::new("n", Category::Calibration, ValueKind::Count);
        assert_approx_eq!(count.resolve(1.5).upper(), 1.95);
        assert!(count.check_estimate(1.5).is_ok());
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let bad = ParameterSpec::new("p", Category::NaturalHistory, ValueKind::Probability)
            .with_bounds(0.5, 1.2);
        assert!(Catalog::new(vec![bad]).is_err());

        let swapped =
            ParameterSpec::new("q", Category::NaturalHistory, ValueKind::Rate).with_bounds(2.0, 1.0);
        assert!(Catalog::new(vec![swapped]).is_err());

        let a = ParameterSpec::new("a", Category::Calibration, ValueKind::Count);
        assert!(Catalog::new(vec![a.clone(), a]).is_err());
    }

    #[test]
    fn default_catalog() {
        let catalog = Catalog::hbv_default();
        assert_eq!(catalog.len(), 3 + 11 + 5 + 32);
        assert!(Catalog::new(catalog.iter().cloned().collect()).is_ok());
        assert_eq!(catalog.sex_shared().count(), 16);
        assert_eq!(catalog.get("cc_4060_f").unwrap().kind(), ValueKind::Count);
    }

    #[test]
    fn catalog_from_toml() {
        let data = r#"
            [[parameter]]
            name = "te_cc_dc"
            category = "treatment_efficacy"
            kind = "probability"
            lower_bound = 0.1
            upper_bound = 0.25

            [[parameter]]
            name = "cc_020_m"
            category = "calibration"
            kind = "number"
        "#;
        let catalog = Catalog::from_toml_str(data).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("cc_020_m").unwrap().kind(), ValueKind::Count);
        assert_eq!(catalog.get("te_cc_dc").unwrap().upper_bound(), Some(0.25));
    }
}
