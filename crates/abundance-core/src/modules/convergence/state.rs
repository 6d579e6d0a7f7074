use super::prior::{ElementSnapshot, PriorStrategy};
use crate::domain::{
    AbundanceError, AbundanceResult, FitResult, ModelId, ModelPopulation, ModelStatus,
    StatusSnapshot,
};
use crate::modules::traits::SmoothingPenalty;

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceState {
    pub pass: usize,
    pub total_passes: usize,
    pub strategy: PriorStrategy,
    pub snapshot: ElementSnapshot,
    pub penalty: Option<SmoothingPenalty>,
    pub max_fit_iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FitVerdict {
    Fitted(FitResult),
    FittedWithoutPenalty(FitResult),
    Rejected { reason: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub statuses: StatusSnapshot,
    pub verdicts: Vec<(ModelId, FitVerdict)>,
    pub aborted: bool,
}

impl PassOutcome {
    pub fn new(statuses: StatusSnapshot) -> Self {
        Self {
            statuses,
            verdicts: Vec::new(),
            aborted: false,
        }
    }

    pub fn status_mut(&mut self, id: ModelId) -> AbundanceResult<&mut ModelStatus> {
        self.statuses.get_mut(id).ok_or_else(|| missing_model(id))
    }

    pub fn record(&mut self, id: ModelId, verdict: FitVerdict) -> AbundanceResult<()> {
        let status = self.status_mut(id)?;
        match &verdict {
            FitVerdict::Fitted(_) | FitVerdict::FittedWithoutPenalty(_) => {
                status.acceptable = true;
            }
            FitVerdict::Rejected { .. } => status.reject_and_flag(),
            FitVerdict::Skipped => {}
        }
        self.verdicts.push((id, verdict));
        Ok(())
    }

    pub fn count(&self, predicate: impl Fn(&FitVerdict) -> bool) -> usize {
        self.verdicts
            .iter()
            .filter(|(_, verdict)| predicate(verdict))
            .count()
    }

    pub fn merge_into(self, population: &mut ModelPopulation) -> AbundanceResult<()> {
        population.apply_statuses(&self.statuses)?;
        for (id, verdict) in self.verdicts {
            let fit = match verdict {
                FitVerdict::Fitted(fit) | FitVerdict::FittedWithoutPenalty(fit) => fit,
                FitVerdict::Rejected { .. } | FitVerdict::Skipped => continue,
            };
            let model = population.get_mut(id).ok_or_else(|| missing_model(id))?;
            model.fit = Some(fit);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionVerdict {
    Detected,
    UpperLimit(f64),
    Rejected,
}

pub(crate) fn missing_model(id: ModelId) -> AbundanceError {
    AbundanceError::internal(
        "SYS.MODEL_INDEX",
        format!("model {id} is not in the population"),
    )
}
