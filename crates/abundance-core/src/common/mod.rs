pub mod config;
pub mod elements;
pub mod solar;

pub use config::{
    load_run_config, ConfigError, RunConfig, SummaryConfig, SummaryWeighting,
    SynthesisFitConfig, SystematicMode,
};
pub use solar::{Asplund2009, SolarReference};
