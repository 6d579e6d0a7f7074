use super::CliError;
use abundance_core::common::{load_run_config, Asplund2009, RunConfig, SolarReference};
use abundance_core::domain::{AbundanceError, ModelPopulation, Species};
use abundance_core::modules::{write_summary, RecordedSystematics};
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args)]
pub(super) struct SummaryArgs {
    /// Model population snapshot (JSON)
    #[arg(long)]
    population: PathBuf,

    /// Run config (JSON); every field has a default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the output tables, overriding the config
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output file stem, overriding the config
    #[arg(long)]
    name: Option<String>,

    /// Skip the error budget and write NaN error columns
    #[arg(long)]
    quick: bool,
}

#[derive(clap::Args)]
pub(super) struct SolarArgs {
    /// Species codes such as 26.0 or 56.1
    #[arg(value_name = "species", required = true)]
    species: Vec<String>,
}

#[derive(clap::Args)]
pub(super) struct CheckConfigArgs {
    /// Run config path
    #[arg(value_name = "config")]
    config: PathBuf,
}

pub(super) fn run_summary_command(args: SummaryArgs) -> Result<i32, CliError> {
    let mut config = match &args.config {
        Some(path) => load_run_config(path).map_err(AbundanceError::from)?,
        None => RunConfig::default(),
    };
    if let Some(output_dir) = args.output_dir {
        config.summary.output_dir = Some(output_dir);
    }
    if let Some(name) = args.name {
        config.output_name = name;
    }
    if args.quick {
        config.summary.quick_no_errors = true;
    }
    config.validate().map_err(AbundanceError::from)?;

    let population = ModelPopulation::load_json(&args.population)?;
    info!(
        models = population.len(),
        star = population.star.as_deref().unwrap_or("unnamed"),
        "loaded population"
    );
    let systematics = RecordedSystematics::from_population(&population)?;
    let written = write_summary(&population, &Asplund2009, &systematics, &config)?;

    println!("lines: {}", written.line_table.display());
    println!("summary: {}", written.summary_table.display());
    Ok(0)
}

pub(super) fn run_solar_command(args: SolarArgs) -> Result<i32, CliError> {
    for code in &args.species {
        let species = code.parse::<Species>()?;
        let value = Asplund2009.solar_abundance(species)?;
        println!("{} {} {:.2}", species, species.element_name(), value);
    }
    Ok(0)
}

pub(super) fn run_check_config_command(args: CheckConfigArgs) -> Result<i32, CliError> {
    let config = load_run_config(&args.config).map_err(AbundanceError::from)?;
    let rendered =
        serde_json::to_string_pretty(&config).context("failed to render the run config")?;
    println!("{rendered}");
    Ok(0)
}
