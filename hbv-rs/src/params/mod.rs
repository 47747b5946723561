//! Parameter catalog, point estimates and the age/sex strata they are
//! indexed by.
mod catalog;
mod estimates;
mod stratum;

pub use catalog::*;
pub use estimates::*;
pub use stratum::*;
