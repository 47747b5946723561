use std::time::Duration;

/// Errors raised by the sampling, orchestration and aggregation pipeline.
///
/// Conditions the pipeline recovers from locally (zero point estimates, empty
/// age bins, countries absent from the run set) are not represented here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid parameter spec `{name}`: {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("unknown population stratum `{0}`")]
    UnknownStratum(String),

    #[error("unknown age bin `{0}`")]
    UnknownAgeBin(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("model execution failed: {0}")]
    ModelFailed(String),

    #[error("model execution panicked")]
    RunPanicked,

    #[error("model execution exceeded {0:?}")]
    RunTimeout(Duration),

    #[error("cannot build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
