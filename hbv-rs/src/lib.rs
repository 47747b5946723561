//! Stochastic scenario sampling and burden aggregation for hepatitis B
//! projections submitted to VIMC.
//!
//! The compartmental disease model itself lives outside this crate and is
//! reached through the [`sim::ExternalModel`] trait. This crate samples
//! around its calibrated point estimates, drives it over every scenario and
//! draw, and reshapes what comes back into the consortium's burden tables.
pub mod combine;
pub mod config;
pub mod error;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod prelude;
pub mod sampler;
pub mod scenarios;
pub mod sim;
pub mod utils;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::sampler::{sample, SampleSet, Sampler};

/// Base Real type used by this crate. Uses an alias to easily change precision
/// if necessary.
pub type Real = f64;
pub(crate) const INF: Real = Real::INFINITY;
pub(crate) const NAN: Real = Real::NAN;

/// Calendar year.
pub type Year = i32;

/// Single-year age, as found in population files.
pub type Age = u8;

/// Zero-based index of a stochastic draw. Output tables report it as the
/// one-based `run_id`.
pub type RunIndex = usize;
