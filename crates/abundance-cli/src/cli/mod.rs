mod commands;
mod logging;

use abundance_core::domain::AbundanceError;
use clap::Parser;

pub fn run_from_env() -> i32 {
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let abundance_error = error.as_abundance_error();
            eprintln!("{}", abundance_error.diagnostic_line());
            if let Some(summary_line) = abundance_error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            abundance_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("abundance-rs".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();

    match Cli::try_parse_from(&full_args) {
        Ok(cli) => {
            logging::init_logging(cli.verbose);
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "abundance-rs",
    about = "Stellar abundance summaries and error budgets"
)]
struct Cli {
    /// Log progress and per-line decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Write line and species tables for a model population
    Summary(commands::SummaryArgs),
    /// Print solar reference abundances for species codes
    Solar(commands::SolarArgs),
    /// Validate a run config and print it with defaults filled in
    CheckConfig(commands::CheckConfigArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Summary(args) => commands::run_summary_command(args),
        CliCommand::Solar(args) => commands::run_solar_command(args),
        CliCommand::CheckConfig(args) => commands::run_check_config_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(AbundanceError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<AbundanceError> for CliError {
    fn from(error: AbundanceError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_abundance_error(&self) -> AbundanceError {
        match self {
            Self::Usage(message) => {
                AbundanceError::input_validation("INPUT.CLI_USAGE", message.clone())
            }
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => AbundanceError::internal("SYS.CLI", format!("{error:#}")),
        }
    }
}
