use crate::{
    params::{Catalog, ParameterSpec, PointEstimates, Sex, Stratum, ValueKind},
    utils::{PointStats, PointStatsAcc, Stats},
    Real, RunIndex,
};
use getset::*;
use log::*;
use rand::prelude::*;
use rand_distr::{Normal, Uniform};
use serde::{Deserialize, Serialize};
use statrs::function::erf::{erfc, erfc_inv};
use std::{collections::BTreeMap, f64::consts::SQRT_2};

/// Distribution used to draw a parameter around its point estimate.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ParamDistribution {
    /// Normal restricted exactly to [lower, upper]. Used for probabilities
    /// and proportions.
    TruncatedNormal {
        mean: Real,
        std_dev: Real,
        lower: Real,
        upper: Real,
    },
    /// Unbounded normal. Used for rates.
    Normal { mean: Real, std_dev: Real },
    /// Flat over [lower, upper]. Used for everything else.
    Uniform { lower: Real, upper: Real },
}

impl ParamDistribution {
    /// Select the distribution for a spec given the point estimate it is
    /// centred on.
    pub fn for_spec(spec: &ParameterSpec, point_estimate: Real) -> Self {
        let bounds = spec.resolve(point_estimate);
        match spec.kind() {
            ValueKind::Probability | ValueKind::Proportion => ParamDistribution::TruncatedNormal {
                mean: point_estimate,
                std_dev: bounds.std_dev(),
                lower: bounds.lower(),
                upper: bounds.upper(),
            },
            ValueKind::Rate => ParamDistribution::Normal {
                mean: point_estimate,
                std_dev: bounds.std_dev(),
            },
            ValueKind::Count => ParamDistribution::Uniform {
                lower: bounds.lower(),
                upper: bounds.upper(),
            },
        }
    }
}

impl Distribution<Real> for ParamDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Real {
        match *self {
            ParamDistribution::TruncatedNormal {
                mean,
                std_dev,
                lower,
                upper,
            } => truncated_normal(rng, mean, std_dev, lower, upper),
            ParamDistribution::Normal { mean, std_dev } => match Normal::new(mean, std_dev) {
                Ok(d) => d.sample(rng),
                Err(_) => mean,
            },
            ParamDistribution::Uniform { lower, upper } => {
                if upper > lower && (upper - lower).is_finite() {
                    Uniform::new_inclusive(lower, upper).sample(rng)
                } else {
                    lower
                }
            }
        }
    }
}

fn std_normal_cdf(z: Real) -> Real {
    0.5 * erfc(-z / SQRT_2)
}

fn std_normal_inv_cdf(p: Real) -> Real {
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Draw from N(mean, std_dev) conditioned on [lower, upper] by inverting the
/// CDF over the admissible probability range. Intervals in the upper tail are
/// mirrored to the lower tail, where the CDF keeps its precision.
fn truncated_normal<R: Rng + ?Sized>(
    rng: &mut R,
    mean: Real,
    std_dev: Real,
    lower: Real,
    upper: Real,
) -> Real {
    let clamp = |x: Real| x.max(lower).min(upper);
    if !(std_dev > 0.0) || !(upper > lower) {
        return clamp(mean);
    }

    let mut a = (lower - mean) / std_dev;
    let mut b = (upper - mean) / std_dev;
    let mirrored = a > 0.0;
    if mirrored {
        let tmp = a;
        a = -b;
        b = -tmp;
    }

    let (pa, pb) = (std_normal_cdf(a), std_normal_cdf(b));
    let u = pa + rng.gen::<Real>() * (pb - pa);
    let mut z = std_normal_inv_cdf(u);
    if mirrored {
        z = -z;
    }

    let x = mean + std_dev * z;
    if x.is_nan() {
        clamp(mean)
    } else {
        clamp(x)
    }
}

////////////////////////////////////////////////////////////////////////////////
// SAMPLE SET
////////////////////////////////////////////////////////////////////////////////

/// Draws for every sampled (parameter, stratum) pair of a country. Every
/// sequence has exactly `run_count` values and the run index is the position
/// in the sequence.
#[derive(Debug, Clone, PartialEq, Default, Getters, CopyGetters, Serialize, Deserialize)]
pub struct SampleSet {
    #[getset(get = "pub")]
    country: String,
    #[getset(get_copy = "pub")]
    run_count: usize,
    values: BTreeMap<String, BTreeMap<Stratum, Vec<Real>>>,
}

/// Summary of the draws of one (parameter, stratum) pair.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct SampleSummary {
    #[getset(get = "pub")]
    parameter: String,
    #[getset(get_copy = "pub")]
    stratum: Stratum,
    #[getset(get_copy = "pub")]
    stats: PointStats,
}

impl SampleSet {
    pub fn new(country: &str, run_count: usize) -> Self {
        SampleSet {
            country: country.to_string(),
            run_count,
            values: BTreeMap::new(),
        }
    }

    /// Store a sequence of draws. Sequences of the wrong length are ignored
    /// and reported as false.
    pub fn insert(&mut self, parameter: &str, stratum: Stratum, draws: Vec<Real>) -> bool {
        if draws.len() != self.run_count {
            return false;
        }
        self.values
            .entry(parameter.to_string())
            .or_default()
            .insert(stratum, draws);
        return true;
    }

    pub fn get(&self, parameter: &str, stratum: Stratum) -> Option<&[Real]> {
        self.values
            .get(parameter)?
            .get(&stratum)
            .map(|v| v.as_slice())
    }

    /// Value of the given draw.
    pub fn value(&self, parameter: &str, stratum: Stratum, run: RunIndex) -> Option<Real> {
        self.get(parameter, stratum)?.get(run).copied()
    }

    pub fn contains(&self, parameter: &str, stratum: Stratum) -> bool {
        self.get(parameter, stratum).is_some()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Stratum, &[Real])> {
        self.values.iter().flat_map(|(name, m)| {
            m.iter()
                .map(move |(s, v)| (name.as_str(), *s, v.as_slice()))
        })
    }

    /// Number of (parameter, stratum) sequences.
    pub fn len(&self) -> usize {
        self.values.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite each female sequence of the given parameter with the male
    /// sequence of the same age bin.
    pub fn share_sex(&mut self, parameter: &str) {
        if let Some(m) = self.values.get_mut(parameter) {
            let males: Vec<(Stratum, Vec<Real>)> = m
                .iter()
                .filter(|(s, _)| s.sex() == Sex::Male)
                .map(|(s, v)| (*s, v.clone()))
                .collect();
            for (s, v) in males {
                m.insert(s.counterpart(), v);
            }
        }
    }

    pub fn summary(&self) -> Vec<SampleSummary> {
        self.iter()
            .map(|(name, stratum, draws)| {
                let mut acc = PointStatsAcc::new();
                acc.add_many(draws.iter().copied());
                SampleSummary {
                    parameter: name.to_string(),
                    stratum,
                    stats: acc.stats(),
                }
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////////
// SAMPLER
////////////////////////////////////////////////////////////////////////////////

/// Draws run samples for a catalog from a single seeded generator.
#[derive(Debug, Clone, Getters, CopyGetters, Setters)]
pub struct Sampler {
    #[getset(get = "pub")]
    catalog: Catalog,
    #[getset(get_copy = "pub", set = "pub")]
    run_count: usize,
    #[getset(get_copy = "pub", set = "pub")]
    seed: u64,
}

impl Sampler {
    pub fn new(catalog: Catalog, run_count: usize, seed: u64) -> Self {
        Sampler {
            catalog,
            run_count,
            seed,
        }
    }

    /// Draw `run_count` values for every catalog parameter at every stratum
    /// where the country defines a non-zero point estimate.
    ///
    /// Draws happen in catalog order and then stratum order from one
    /// generator, so the same inputs and seed always give the same set.
    /// Efficacy parameters then have their female sequences replaced by the
    /// male ones.
    pub fn sample(&self, estimates: &PointEstimates) -> SampleSet {
        let country = estimates.country();
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut samples = SampleSet::new(country, self.run_count);

        for spec in self.catalog.iter() {
            for (stratum, pe) in estimates.strata(spec.name()) {
                if pe == 0.0 {
                    continue;
                }
                if let Err(e) = spec.check_estimate(pe) {
                    warn!(target: "sampler", "{}: skipping {} at {}: {}", country, spec.name(), stratum, e);
                    continue;
                }
                let distrib = ParamDistribution::for_spec(spec, pe);
                let draws: Vec<Real> = (0..self.run_count).map(|_| distrib.sample(&mut rng)).collect();
                if !samples.insert(spec.name(), stratum, draws) {
                    warn!(target: "sampler", "{}: draws of {} at {} dropped, expected {} values", country, spec.name(), stratum, self.run_count);
                }
            }
        }

        for name in self.catalog.sex_shared() {
            samples.share_sex(name);
        }

        info!(target: "sampler", "{}: {} runs for {} parameter/stratum pairs", country, self.run_count, samples.len());
        for s in samples.summary() {
            let st = s.stats();
            debug!(
                target: "sampler",
                "{} {}: mean={:.4}, std={:.4}, min={:.4}, max={:.4}",
                s.parameter(), s.stratum(), st.mean(), st.std(), st.min(), st.max()
            );
        }
        return samples;
    }
}

/// Sample a country's parameters and return the draws along with the point
/// estimates they were centred on.
pub fn sample(
    estimates: &PointEstimates,
    catalog: &Catalog,
    run_count: usize,
    seed: u64,
) -> (SampleSet, PointEstimates) {
    let sampler = Sampler::new(catalog.clone(), run_count, seed);
    (sampler.sample(estimates), estimates.clone())
}
