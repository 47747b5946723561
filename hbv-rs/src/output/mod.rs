//! Reshaping of model outputs into the consortium's long burden tables.
mod burden;
mod inputs;
mod population;
mod table;

pub use burden::*;
pub use inputs::*;
pub use population::*;
pub use table::*;
