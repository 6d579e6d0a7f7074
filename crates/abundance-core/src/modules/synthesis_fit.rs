use super::convergence::{run_convergence, ConvergenceReport};
use super::linelist::import_line_list;
use super::traits::FittingEngine;
use crate::common::{SolarReference, SynthesisFitConfig};
use crate::domain::{AbundanceResult, ModelPopulation};
use std::sync::atomic::AtomicBool;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisFitReport {
    pub cleared: usize,
    pub imported: usize,
    pub extra_imported: usize,
    pub convergence: ConvergenceReport,
}

pub fn run_synthesis_fit(
    population: &mut ModelPopulation,
    engine: &dyn FittingEngine,
    solar: &dyn SolarReference,
    config: &SynthesisFitConfig,
    abort: Option<&AtomicBool>,
) -> AbundanceResult<SynthesisFitReport> {
    let mut report = SynthesisFitReport::default();

    if config.clear_existing_syntheses {
        report.cleared = population.clear_synthesis_models();
        info!(removed = report.cleared, "cleared existing synthesis models");
    }
    if let Some(path) = &config.synthesis_linelist {
        report.imported = import_line_list(population, path)?;
    }

    report.convergence = run_convergence(population, engine, solar, config, abort)?;
    if report.convergence.aborted {
        return Ok(report);
    }

    if let Some(path) = &config.extra_synthesis_linelist {
        report.extra_imported = import_line_list(population, path)?;
    }
    Ok(report)
}
