//! Iterative re-fitting of synthesis models.
//!
//! Synthesis fits need abundances of blending elements, and those abundances
//! come from the same set of fits. The loop resolves this by refinement: each
//! pass freezes the element abundances of all accepted lines, seeds every
//! model's priors from that snapshot, and fits. The configured number of
//! passes runs once with metallicity-scaled priors (and a smoothing penalty)
//! and once more with anchored priors. A detection test and a width sanity
//! pass close the run.

mod prior;
mod state;

pub use prior::{
    priors_for_model, reference_prior, AbundancePriors, AnchorClips, ElementSnapshot,
    PriorStrategy,
};
pub use state::{ConvergenceState, DetectionVerdict, FitVerdict, PassOutcome};

use super::aggregate::population_element_abundances;
use super::traits::{FitRequest, FittingEngine, SmoothingPenalty};
use crate::common::{SolarReference, SynthesisFitConfig};
use crate::domain::{AbundanceResult, FitResult, ModelId, ModelPopulation};
use state::missing_model;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceReport {
    pub passes_completed: usize,
    pub fits: usize,
    pub penalty_retries: usize,
    pub rejected: usize,
    pub detections: BTreeMap<ModelId, DetectionVerdict>,
    pub width_rejections: usize,
    pub aborted: bool,
}

impl ConvergenceReport {
    pub fn upper_limits(&self) -> usize {
        self.detections
            .values()
            .filter(|verdict| matches!(verdict, DetectionVerdict::UpperLimit(_)))
            .count()
    }
}

/// Runs both prior phases, the detection test and the width pass.
///
/// Profile models are never refitted; only the width pass looks at them.
/// When `abort` is raised the run stops at the next model or pass boundary,
/// keeps what earlier passes merged, and skips the closing checks.
pub fn run_convergence(
    population: &mut ModelPopulation,
    engine: &dyn FittingEngine,
    solar: &dyn SolarReference,
    config: &SynthesisFitConfig,
    abort: Option<&AtomicBool>,
) -> AbundanceResult<ConvergenceReport> {
    let synthesis_ids = population.synthesis_ids();
    let total_passes = 2 * config.passes;
    let mut report = ConvergenceReport::default();
    info!(
        models = synthesis_ids.len(),
        passes = total_passes,
        "starting synthesis convergence"
    );

    let phases = [
        (
            PriorStrategy::Metallicity,
            Some(SmoothingPenalty {
                target: config.smooth_target,
                scale: config.smooth_scale,
            }),
        ),
        (PriorStrategy::Anchored, None),
    ];
    for (phase_index, (strategy, penalty)) in phases.into_iter().enumerate() {
        for phase_pass in 0..config.passes {
            if is_aborted(abort) {
                report.aborted = true;
                warn!(pass = report.passes_completed, "convergence aborted");
                return Ok(report);
            }

            let elements = population_element_abundances(population, solar)?;
            let state = ConvergenceState {
                pass: phase_index * config.passes + phase_pass,
                total_passes,
                strategy,
                snapshot: ElementSnapshot::new(
                    elements,
                    population.stellar_parameters.metallicity,
                ),
                penalty,
                max_fit_iterations: config.max_fit_iterations,
            };
            let clips = AnchorClips {
                alpha: config.alpha_anchor_clip,
                rprocess: config.rprocess_anchor_clip,
            };

            let outcome = run_pass(population, &synthesis_ids, engine, solar, &state, clips, abort)?;
            let fits = outcome.count(|verdict| {
                matches!(
                    verdict,
                    FitVerdict::Fitted(_) | FitVerdict::FittedWithoutPenalty(_)
                )
            });
            let retries =
                outcome.count(|verdict| matches!(verdict, FitVerdict::FittedWithoutPenalty(_)));
            let rejected =
                outcome.count(|verdict| matches!(verdict, FitVerdict::Rejected { .. }));
            let aborted = outcome.aborted;
            outcome.merge_into(population)?;

            report.fits += fits;
            report.penalty_retries += retries;
            report.rejected += rejected;
            info!(
                pass = state.pass + 1,
                total = total_passes,
                priors = strategy.label(),
                fits,
                rejected,
                "synthesis pass complete"
            );
            if aborted {
                report.aborted = true;
                warn!(pass = state.pass + 1, "convergence aborted mid-pass");
                return Ok(report);
            }
            report.passes_completed += 1;
        }
    }

    report.detections = check_detections(population, &synthesis_ids, engine, config)?;
    report.width_rejections = reject_wide_lines(population, config.max_fwhm);
    info!(
        removed = report.width_rejections,
        max_fwhm = config.max_fwhm,
        "removed lines wider than the FWHM limit"
    );
    Ok(report)
}

pub fn run_pass(
    population: &ModelPopulation,
    synthesis_ids: &[ModelId],
    engine: &dyn FittingEngine,
    solar: &dyn SolarReference,
    state: &ConvergenceState,
    clips: AnchorClips,
    abort: Option<&AtomicBool>,
) -> AbundanceResult<PassOutcome> {
    let mut outcome = PassOutcome::new(population.statuses());

    for &id in synthesis_ids {
        if is_aborted(abort) {
            outcome.aborted = true;
            break;
        }
        let model = population.get(id).ok_or_else(|| missing_model(id))?;
        if model.status.user_flagged {
            outcome.record(id, FitVerdict::Skipped)?;
            continue;
        }

        let priors = priors_for_model(model, state.strategy, &state.snapshot, solar, clips)?;
        let request = FitRequest {
            max_iterations: state.max_fit_iterations,
            penalty: state.penalty,
            priors: &priors,
        };

        let verdict = match engine.fit(model, &request) {
            Ok(fit) => FitVerdict::Fitted(fit),
            Err(failure) if request.penalty.is_some() => {
                debug!(
                    model = %id,
                    "fit failed with smoothing penalty ({failure}); retrying without it"
                );
                let relaxed = FitRequest {
                    penalty: None,
                    ..request
                };
                match engine.fit(model, &relaxed) {
                    Ok(fit) => FitVerdict::FittedWithoutPenalty(fit),
                    Err(failure) => FitVerdict::Rejected {
                        reason: failure.to_string(),
                    },
                }
            }
            Err(failure) => FitVerdict::Rejected {
                reason: failure.to_string(),
            },
        };

        if let FitVerdict::Rejected { reason } = &verdict {
            warn!(
                model = %id,
                species = %model.species,
                "fit of {:.3} failed, rejecting: {reason}",
                model.wavelength
            );
        }
        outcome.record(id, verdict)?;
    }
    Ok(outcome)
}

/// Tests every acceptable synthesis model that is not already an upper limit,
/// user-flagged ones included. Non-detections are rejected and flagged; a
/// successful upper-limit search then turns them into accepted upper limits,
/// a failed one clears the fitted abundance.
fn check_detections(
    population: &mut ModelPopulation,
    synthesis_ids: &[ModelId],
    engine: &dyn FittingEngine,
    config: &SynthesisFitConfig,
) -> AbundanceResult<BTreeMap<ModelId, DetectionVerdict>> {
    let mut verdicts = BTreeMap::new();

    for &id in synthesis_ids {
        let model = population.get_mut(id).ok_or_else(|| missing_model(id))?;
        if !model.status.acceptable || model.status.upper_limit {
            continue;
        }

        let detected = match engine.check_detection(model, config.detection_sigma) {
            Ok(check) => check.detected,
            Err(failure) => {
                warn!(model = %id, "detection check failed ({failure}); treating as non-detection");
                false
            }
        };
        if detected {
            verdicts.insert(id, DetectionVerdict::Detected);
            continue;
        }

        model.status.reject_and_flag();
        let verdict = match engine.find_upper_limit(model, config.upper_limit_sigma) {
            Ok(limit) => {
                model.status.accept_upper_limit();
                let fit = model
                    .fit
                    .get_or_insert(FitResult::new(limit, f64::NAN, f64::NAN));
                fit.log_eps = limit;
                info!(
                    model = %id,
                    species = %model.species,
                    "{:.3}: not detected at {}σ, upper limit {:.3}",
                    model.wavelength,
                    config.detection_sigma,
                    limit
                );
                DetectionVerdict::UpperLimit(limit)
            }
            Err(failure) => {
                if let Some(fit) = model.fit.as_mut() {
                    fit.log_eps = f64::NAN;
                }
                warn!(
                    model = %id,
                    species = %model.species,
                    "{:.3}: not detected and no upper limit found: {failure}",
                    model.wavelength
                );
                DetectionVerdict::Rejected
            }
        };
        verdicts.insert(id, verdict);
    }
    Ok(verdicts)
}

fn reject_wide_lines(population: &mut ModelPopulation, max_fwhm: f64) -> usize {
    let mut removed = 0;
    let ids = population.iter().map(|(id, _)| id).collect::<Vec<_>>();
    for id in ids {
        let Some(model) = population.get_mut(id) else {
            continue;
        };
        let too_wide = model.fwhm().is_some_and(|fwhm| fwhm > max_fwhm);
        if model.status.acceptable && too_wide {
            debug!(model = %id, "FWHM above {max_fwhm}; rejecting");
            model.status.reject_and_flag();
            removed += 1;
        }
    }
    removed
}

fn is_aborted(abort: Option<&AtomicBool>) -> bool {
    abort.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::{reject_wide_lines, run_convergence, DetectionVerdict};
    use crate::common::{Asplund2009, SynthesisFitConfig};
    use crate::domain::{
        FitResult, ModelId, ModelPopulation, ModelStatus, SpectralModel, Species,
        StellarParameters,
    };
    use crate::modules::traits::{DetectionCheck, FitFailure, FitRequest, FittingEngine};
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct ScriptedEngine {
        fail_with_penalty: Vec<f64>,
        fail_always: Vec<f64>,
        undetected: Vec<f64>,
        no_limit: Vec<f64>,
        fwhm: f64,
        calls: Cell<usize>,
        detection_calls: Cell<usize>,
        penalties: RefCell<Vec<bool>>,
    }

    impl FittingEngine for ScriptedEngine {
        fn fit(
            &self,
            model: &SpectralModel,
            request: &FitRequest<'_>,
        ) -> Result<FitResult, FitFailure> {
            self.calls.set(self.calls.get() + 1);
            self.penalties.borrow_mut().push(request.penalty.is_some());
            if self.fail_always.contains(&model.wavelength)
                || (request.penalty.is_some() && self.fail_with_penalty.contains(&model.wavelength))
            {
                return Err(FitFailure::new("did not converge"));
            }
            Ok(FitResult::new(1.0, 0.05, self.fwhm))
        }

        fn check_detection(
            &self,
            model: &SpectralModel,
            _sigma: f64,
        ) -> Result<DetectionCheck, FitFailure> {
            self.detection_calls.set(self.detection_calls.get() + 1);
            Ok(DetectionCheck {
                detected: !self.undetected.contains(&model.wavelength),
                delta_statistic: 1.0,
            })
        }

        fn find_upper_limit(&self, model: &SpectralModel, _sigma: f64) -> Result<f64, FitFailure> {
            if self.no_limit.contains(&model.wavelength) {
                Err(FitFailure::new("limit search failed"))
            } else {
                Ok(-0.5)
            }
        }
    }

    fn population(wavelengths: &[f64]) -> ModelPopulation {
        let mut population = ModelPopulation::new(StellarParameters {
            effective_temperature: 4800.0,
            surface_gravity: 1.5,
            microturbulence: 1.8,
            metallicity: -2.0,
        });
        for &wavelength in wavelengths {
            population.push(SpectralModel::synthesis(
                wavelength,
                Species::new(56.1),
                0.0,
                0.1,
                vec!["Fe".to_string()],
            ));
        }
        population
    }

    fn engine() -> ScriptedEngine {
        ScriptedEngine {
            fwhm: 0.3,
            ..ScriptedEngine::default()
        }
    }

    #[test]
    fn every_model_is_fitted_in_every_pass() {
        let mut population = population(&[4554.0, 5853.7]);
        let engine = engine();
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .expect("run should complete");
        assert_eq!(report.passes_completed, 4);
        assert_eq!(engine.calls.get(), 8);
        assert_eq!(report.fits, 8);
        assert_eq!(
            *engine.penalties.borrow(),
            vec![true, true, true, true, false, false, false, false]
        );
        assert!(population.iter().all(|(_, model)| model.status.is_detection()));
    }

    #[test]
    fn penalty_failure_retries_without_penalty() {
        let mut population = population(&[4554.0]);
        let engine = ScriptedEngine {
            fail_with_penalty: vec![4554.0],
            ..engine()
        };
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(report.penalty_retries, 2);
        assert_eq!(report.rejected, 0);
        assert!(population.iter().all(|(_, model)| model.status.is_detection()));
    }

    #[test]
    fn repeated_failure_rejects_and_skips_later_passes() {
        let mut population = population(&[4554.0, 5853.7]);
        let engine = ScriptedEngine {
            fail_always: vec![4554.0],
            ..engine()
        };
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(report.rejected, 1);
        // Two attempts on the failing line, then four passes of the other.
        assert_eq!(engine.calls.get(), 6);

        let (_, failed) = population.iter().next().unwrap();
        assert!(!failed.status.acceptable && failed.status.user_flagged);
        assert!(!report.detections.contains_key(&ModelId(0)));
    }

    #[test]
    fn failed_detection_and_failed_limit_stays_rejected() {
        let mut population = population(&[4554.0, 5853.7]);
        let engine = ScriptedEngine {
            undetected: vec![4554.0, 5853.7],
            no_limit: vec![4554.0],
            ..engine()
        };
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .unwrap();
        let models = population.iter().map(|(_, model)| model).collect::<Vec<_>>();
        assert!(!models[0].status.acceptable && models[0].status.user_flagged);
        assert!(models[0].fitted_abundance().is_some_and(f64::is_nan));
        assert!(models[1].status.is_accepted_upper_limit());
        assert_eq!(models[1].fitted_abundance(), Some(-0.5));
        assert_eq!(report.upper_limits(), 1);
        assert_eq!(
            report.detections.values().copied().collect::<Vec<_>>(),
            vec![DetectionVerdict::Rejected, DetectionVerdict::UpperLimit(-0.5)]
        );
    }

    #[test]
    fn wide_lines_are_removed_after_convergence() {
        let mut population = population(&[4554.0]);
        population.push(
            SpectralModel::profile(5000.0, Species::FE_I, 1.0, -1.0)
                .with_fit(FitResult::new(5.5, 0.05, 1.2)),
        );
        population.push(
            SpectralModel::profile(5001.0, Species::FE_I, 1.0, -1.0)
                .with_fit(FitResult::new(5.5, 0.05, 0.4)),
        );
        let report = run_convergence(
            &mut population,
            &engine(),
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(report.width_rejections, 1);
        let models = population.iter().map(|(_, model)| model).collect::<Vec<_>>();
        assert!(models[1].status.user_flagged && !models[1].status.acceptable);
        assert!(models[2].status.is_detection());
    }

    #[test]
    fn width_pass_ignores_unacceptable_models() {
        let mut population = population(&[]);
        population.push(
            SpectralModel::profile(5000.0, Species::FE_I, 1.0, -1.0)
                .with_fit(FitResult::new(5.5, 0.05, 2.0))
                .with_status(ModelStatus::default()),
        );
        assert_eq!(reject_wide_lines(&mut population, 1.0), 0);
    }

    #[test]
    fn user_flagged_models_are_never_refitted() {
        let mut population = population(&[4554.0]);
        let flagged = population.push(
            SpectralModel::synthesis(5853.7, Species::new(56.1), 0.6, -1.0, Vec::new())
                .with_status(ModelStatus {
                    acceptable: false,
                    upper_limit: false,
                    user_flagged: true,
                }),
        );
        let engine = engine();
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(engine.calls.get(), 4);
        assert!(population.get(flagged).unwrap().fit.is_none());
        assert!(!report.detections.contains_key(&flagged));
        assert_eq!(engine.detection_calls.get(), 1);
    }

    #[test]
    fn flagged_but_acceptable_models_still_get_a_detection_test() {
        let mut population = population(&[]);
        let kept = population.push(
            SpectralModel::synthesis(5853.7, Species::new(56.1), 0.6, -1.0, Vec::new())
                .with_fit(FitResult::new(-0.8, 0.05, 0.3))
                .with_status(ModelStatus {
                    acceptable: true,
                    upper_limit: false,
                    user_flagged: true,
                }),
        );
        let engine = ScriptedEngine {
            undetected: vec![5853.7],
            ..engine()
        };
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(engine.calls.get(), 0);
        assert_eq!(engine.detection_calls.get(), 1);
        assert_eq!(
            report.detections.get(&kept),
            Some(&DetectionVerdict::UpperLimit(-0.5))
        );
        let model = population.get(kept).unwrap();
        assert!(model.status.is_accepted_upper_limit());
        assert_eq!(model.fitted_abundance(), Some(-0.5));
    }

    #[test]
    fn existing_upper_limits_are_not_retested() {
        let mut population = population(&[]);
        population.push(
            SpectralModel::synthesis(4129.7, Species::new(63.1), 0.0, 0.2, Vec::new())
                .with_fit(FitResult::new(-2.1, f64::NAN, 0.3))
                .with_status(ModelStatus {
                    acceptable: true,
                    upper_limit: true,
                    user_flagged: true,
                }),
        );
        let engine = engine();
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(engine.detection_calls.get(), 0);
        assert!(report.detections.is_empty());
    }

    #[test]
    fn raised_abort_flag_stops_before_the_first_pass() {
        let mut population = population(&[4554.0]);
        let engine = engine();
        let abort = AtomicBool::new(true);
        let report = run_convergence(
            &mut population,
            &engine,
            &Asplund2009,
            &SynthesisFitConfig::default(),
            Some(&abort),
        )
        .unwrap();
        assert!(report.aborted);
        assert_eq!(report.passes_completed, 0);
        assert_eq!(engine.calls.get(), 0);
    }
}
