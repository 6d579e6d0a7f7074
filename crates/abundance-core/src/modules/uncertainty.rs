//! Per-line error budget.
//!
//! e_tot² = e_stat² + e_param² + e_sys², where e_stat carries a minimum
//! floor, e_param = sqrt(eᵀRe) combines the four stellar-parameter shifts
//! through their correlation matrix, and e_sys is a per-species scatter term
//! (a fixed default, or the maximum-likelihood estimate below).

use super::tables::LineRow;
use super::traits::StellarParameterSystematics;
use crate::common::{SummaryConfig, SystematicMode};
use crate::domain::{AbundanceError, AbundanceResult, ModelPopulation, Species};
use crate::numerics::{brent_root, CorrelationMatrix, RootOptions};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const SCATTER_UPPER_BOUND: f64 = 3.0;
pub const SCATTER_ROOT_XTOL: f64 = 0.001;
pub const SCATTER_MAX_OUTER_ITERATIONS: usize = 100;
pub const SCATTER_CONVERGENCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorBudget {
    pub stat: f64,
    pub scatter: f64,
    pub shifts: [f64; 4],
    pub parameter_systematic: f64,
    pub total: f64,
    pub weight: f64,
}

impl ErrorBudget {
    pub fn combine(
        stat_error: f64,
        floor: f64,
        scatter: f64,
        shifts: [f64; 4],
        correlation: &CorrelationMatrix,
    ) -> AbundanceResult<Self> {
        let stat = apply_statistical_floor(stat_error, floor);
        let parameter_systematic = correlation
            .combined_error(&shifts)
            .map_err(|source| AbundanceError::computation("RUN.ERROR_BUDGET", source.to_string()))?;
        let total = total_error(stat, parameter_systematic, scatter);
        Ok(Self {
            stat,
            scatter,
            shifts,
            parameter_systematic,
            total,
            weight: total.powi(-2),
        })
    }
}

pub fn apply_statistical_floor(stat_error: f64, floor: f64) -> f64 {
    (stat_error.powi(2) + floor.powi(2)).sqrt()
}

pub fn total_error(stat: f64, parameter_systematic: f64, scatter: f64) -> f64 {
    (stat.powi(2) + parameter_systematic.powi(2) + scatter.powi(2)).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterEstimate {
    pub scatter: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub fn scatter_residual(deviations: &[f64], stat_errors: &[f64], scatter: f64) -> f64 {
    deviations
        .iter()
        .zip(stat_errors)
        .map(|(dx, sigma)| {
            let variance = sigma.powi(2) + scatter.powi(2);
            dx.powi(2) / variance.powi(2) - variance.recip()
        })
        .sum()
}

/// Maximum-likelihood scatter s ≥ 0 beyond the quoted statistical errors.
///
/// x̄ is the uniform mean. No sign change of the residual on [0, 3] means
/// no positive root and s = 0. A failed or unconverged solve keeps the last
/// estimate and reports `converged == false`.
pub fn estimate_species_scatter(log_eps: &[f64], stat_errors: &[f64]) -> ScatterEstimate {
    let mut scatter = 0.0;
    let mut previous = 0.0;

    for iteration in 1..=SCATTER_MAX_OUTER_ITERATIONS {
        let mean = log_eps.iter().sum::<f64>() / log_eps.len() as f64;
        let deviations = log_eps.iter().map(|value| value - mean).collect::<Vec<_>>();

        let residual = |s: f64| scatter_residual(&deviations, stat_errors, s);
        let at_zero = residual(0.0);
        let at_bound = residual(SCATTER_UPPER_BOUND);
        if !(at_zero > 0.0 && at_bound < 0.0) {
            if at_bound > 0.0 {
                warn!(
                    "scatter exceeds the {SCATTER_UPPER_BOUND} dex search bound; using 0"
                );
            }
            return ScatterEstimate {
                scatter: 0.0,
                iterations: iteration,
                converged: true,
            };
        }

        match brent_root(
            residual,
            0.0,
            SCATTER_UPPER_BOUND,
            RootOptions::with_xtol(SCATTER_ROOT_XTOL),
        ) {
            Ok(solution) => scatter = solution.root,
            Err(error) => {
                warn!("scatter root search failed: {error}");
                return ScatterEstimate {
                    scatter,
                    iterations: iteration,
                    converged: false,
                };
            }
        }

        if (previous - scatter).abs() < SCATTER_CONVERGENCE {
            return ScatterEstimate {
                scatter,
                iterations: iteration,
                converged: true,
            };
        }
        previous = scatter;
    }

    ScatterEstimate {
        scatter,
        iterations: SCATTER_MAX_OUTER_ITERATIONS,
        converged: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorBudgetSettings {
    pub min_stat_error: f64,
    pub default_systematic_error: f64,
    pub mode: SystematicMode,
}

impl From<&SummaryConfig> for ErrorBudgetSettings {
    fn from(config: &SummaryConfig) -> Self {
        Self {
            min_stat_error: config.min_stat_error,
            default_systematic_error: config.default_systematic_error,
            mode: config.systematic_mode,
        }
    }
}

impl Default for ErrorBudgetSettings {
    fn default() -> Self {
        Self::from(&SummaryConfig::default())
    }
}

pub fn error_budget_rows(
    population: &ModelPopulation,
    systematics: &dyn StellarParameterSystematics,
    settings: ErrorBudgetSettings,
) -> AbundanceResult<Vec<LineRow>> {
    Ok(line_error_budgets(population, systematics, settings)?
        .into_iter()
        .map(|(row, _)| row)
        .collect())
}

pub fn line_error_budgets(
    population: &ModelPopulation,
    systematics: &dyn StellarParameterSystematics,
    settings: ErrorBudgetSettings,
) -> AbundanceResult<Vec<(LineRow, ErrorBudget)>> {
    let correlation = systematics.correlation();
    let mut pending = Vec::new();

    for (id, model) in population.iter() {
        if !model.status.is_detection() {
            continue;
        }
        let mut row = LineRow::from_model(id, model);

        let stat_error = model
            .fit
            .map(|fit| match fit.covariance_error.filter(|error| error.is_finite()) {
                Some(covariance) if model.is_synthesis() => fit.stat_error.max(covariance),
                _ => fit.stat_error,
            })
            .unwrap_or(f64::NAN);
        let shifts = systematics.shifts(id, model);
        if shifts.is_none() {
            warn!(
                model = %id,
                species = %model.species,
                "line {:.3} has no stellar-parameter systematics; writing NaN",
                model.wavelength
            );
        }

        // Floored here as well so the scatter estimate sees the final e_stat.
        row.e_stat = apply_statistical_floor(stat_error, settings.min_stat_error);
        let shifts = shifts.map(|shifts| shifts.as_array()).unwrap_or([f64::NAN; 4]);
        pending.push((row, stat_error, shifts));
    }

    let rows = pending.iter().map(|(row, _, _)| *row).collect::<Vec<_>>();
    let scatter_by_species = match settings.mode {
        SystematicMode::Default => BTreeMap::new(),
        SystematicMode::Estimated => estimate_scatter_by_species(&rows),
    };

    pending
        .into_iter()
        .map(|(mut row, stat_error, shifts)| {
            let scatter = scatter_by_species
                .get(&row.species)
                .copied()
                .unwrap_or(settings.default_systematic_error);
            let budget = ErrorBudget::combine(
                stat_error,
                settings.min_stat_error,
                scatter,
                shifts,
                correlation,
            )?;
            row.apply_budget(&budget);
            Ok((row, budget))
        })
        .collect()
}

fn estimate_scatter_by_species(rows: &[LineRow]) -> BTreeMap<Species, f64> {
    let mut grouped: BTreeMap<Species, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for row in rows {
        if row.log_eps.is_finite() && row.e_stat.is_finite() {
            let (values, errors) = grouped.entry(row.species).or_default();
            values.push(row.log_eps);
            errors.push(row.e_stat);
        }
    }

    grouped
        .into_iter()
        .map(|(species, (values, errors))| {
            let estimate = estimate_species_scatter(&values, &errors);
            if estimate.converged {
                debug!(
                    species = %species,
                    iterations = estimate.iterations,
                    "scatter {:.3}",
                    estimate.scatter
                );
            } else {
                warn!(
                    species = %species,
                    "scatter did not converge; keeping last estimate {:.3}",
                    estimate.scatter
                );
            }
            (species, estimate.scatter)
        })
        .collect()
}
