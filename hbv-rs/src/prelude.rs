pub use crate::{
    combine::{combine_scenario, Combiner},
    config::Config,
    error::{Error, Result},
    output::{
        Aggregator, BinShare, BurdenMetric, BurdenRecord, BurdenTable, PopulationTable,
        RedistributionWeights, TableKind, WideTable,
    },
    params::{
        AgeBin, Catalog, Category, ParameterSpec, PointEstimates, Sex, Stratum, ValueKind,
    },
    sampler::{sample, ParamDistribution, SampleSet, Sampler},
    scenarios::{CoverageSeries, Scenario, ScenarioSource},
    sim::{
        CommandModel, ExternalModel, ModelOutput, Orchestrator, ParameterOverrides, RunFailure,
        RunResult, ScenarioRuns, SharingTable,
    },
    Age, Real, RunIndex, Year,
};
