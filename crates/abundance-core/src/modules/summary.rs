use super::aggregate::{iron_reference, summarize, summarize_weighted, SpeciesSummary};
use super::tables::{detection_rows, render_line_table, render_summary_table, write_table, LineRow};
use super::traits::StellarParameterSystematics;
use super::uncertainty::{error_budget_rows, ErrorBudgetSettings};
use super::upper_limits::{upper_limit_rows, upper_limit_summary};
use crate::common::{RunConfig, SolarReference, SummaryConfig, SummaryWeighting};
use crate::domain::{AbundanceResult, ModelPopulation};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTables {
    pub lines: Vec<LineRow>,
    pub species: Vec<SpeciesSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTables {
    pub line_table: PathBuf,
    pub summary_table: PathBuf,
}

/// Builds both tables from the current model statuses.
pub fn build_tables(
    population: &ModelPopulation,
    solar: &dyn SolarReference,
    systematics: &dyn StellarParameterSystematics,
    config: &SummaryConfig,
) -> AbundanceResult<SummaryTables> {
    let (mut lines, mut species) = if config.quick_no_errors {
        let lines = detection_rows(population);
        let species = summarize(&lines, solar)?;
        (lines, species)
    } else {
        let lines = error_budget_rows(population, systematics, ErrorBudgetSettings::from(config))?;
        let species = match config.weighting {
            SummaryWeighting::Uniform => summarize(&lines, solar)?,
            SummaryWeighting::InverseVariance => summarize_weighted(&lines, solar)?,
        };
        (lines, species)
    };

    let limits = upper_limit_rows(population);
    let limit_species =
        upper_limit_summary(&limits, &species, iron_reference(&species), solar)?;
    info!(
        detections = lines.len(),
        upper_limits = limits.len(),
        species = species.len(),
        limit_species = limit_species.len(),
        "built abundance tables"
    );
    lines.extend(limits);
    species.extend(limit_species);
    Ok(SummaryTables { lines, species })
}

pub fn write_summary(
    population: &ModelPopulation,
    solar: &dyn SolarReference,
    systematics: &dyn StellarParameterSystematics,
    config: &RunConfig,
) -> AbundanceResult<WrittenTables> {
    let tables = build_tables(population, solar, systematics, &config.summary)?;
    let written = WrittenTables {
        line_table: config.line_table_path(),
        summary_table: config.summary_table_path(),
    };
    write_table(&written.line_table, &render_line_table(&tables.lines))?;
    write_table(&written.summary_table, &render_summary_table(&tables.species))?;
    info!(
        lines = %written.line_table.display(),
        summary = %written.summary_table.display(),
        "wrote abundance tables"
    );
    Ok(written)
}
