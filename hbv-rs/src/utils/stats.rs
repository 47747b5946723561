use crate::{Real, INF, NAN};
use getset::*;
use serde::{Deserialize, Serialize};

/// Running summary of a stream of values.
pub trait Stats {
    fn add(&mut self, x: Real);
    fn add_many<I>(&mut self, xs: I)
    where
        I: IntoIterator<Item = Real>,
    {
        for x in xs {
            self.add(x);
        }
    }
    fn size(&self) -> usize;
    fn total(&self) -> Real;
    fn min(&self) -> Real;
    fn max(&self) -> Real;
    fn var(&self) -> Real;
    fn std(&self) -> Real {
        self.var().sqrt()
    }
    fn mean(&self) -> Real {
        self.total() / self.size() as Real
    }
    fn stats(&self) -> PointStats {
        PointStats {
            mean: self.mean(),
            std: self.std(),
            min: self.min(),
            max: self.max(),
            size: self.size(),
        }
    }
}

/// Accumulate first and second moments plus extremes without storing values.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PointStatsAcc {
    n: usize,
    m1: Real,
    m2: Real,
    min: Real,
    max: Real,
}

impl PointStatsAcc {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stats for PointStatsAcc {
    fn add(&mut self, x: Real) {
        self.n += 1;
        self.m1 += x;
        self.m2 += x * x;
        self.min = Real::min(x, self.min);
        self.max = Real::max(x, self.max);
    }

    fn total(&self) -> Real {
        return self.m1;
    }

    fn var(&self) -> Real {
        if self.n == 0 {
            return NAN;
        }
        let m = self.mean();
        // Clamp tiny negative values from cancellation
        return (self.m2 / self.n as Real - m * m).max(0.0);
    }

    fn min(&self) -> Real {
        self.min
    }

    fn max(&self) -> Real {
        self.max
    }

    fn size(&self) -> usize {
        self.n
    }
}

impl Default for PointStatsAcc {
    fn default() -> Self {
        PointStatsAcc {
            n: 0,
            m1: 0.,
            m2: 0.,
            min: INF,
            max: -INF,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, CopyGetters, Deserialize, Serialize)]
#[getset(get_copy = "pub")]
pub struct PointStats {
    mean: Real,
    std: Real,
    min: Real,
    max: Real,
    size: usize,
}

/// Round to the given number of decimal places, ties to even. Negative zero
/// is normalised to zero so it never shows up as `-0` in exported tables.
pub fn round_to(x: Real, places: u32) -> Real {
    let scale = (10.0 as Real).powi(places as i32);
    let y = (x * scale).round_ties_even() / scale;
    if y == 0.0 {
        0.0
    } else {
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn simple_stats() {
        let mut acc = PointStatsAcc::new();
        acc.add(0.);
        acc.add_many(vec![1., 2., 3., 4.]);
        let st = acc.stats();
        assert_eq!(st.size(), 5);
        assert_approx_eq!(st.mean(), 2.0, 0.001);
        assert_approx_eq!(st.std(), 1.4142, 0.001);
        assert_eq!((st.min(), st.max()), (0.0, 4.0));
    }

    #[test]
    fn rounding_goes_to_even() {
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(1.234, 2), 1.23);
        assert!(round_to(-0.2, 0).is_sign_positive());
    }
}
