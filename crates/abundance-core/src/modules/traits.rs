use super::convergence::AbundancePriors;
use crate::domain::{
    AbundanceError, AbundanceResult, FitResult, ModelId, ModelPopulation, SpectralModel,
    StellarParameterShifts,
};
use crate::numerics::CorrelationMatrix;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingPenalty {
    pub target: f64,
    pub scale: f64,
}

impl SmoothingPenalty {
    pub fn evaluate(&self, width: f64) -> f64 {
        ((width - self.target) / self.scale).powi(2)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub max_iterations: usize,
    pub penalty: Option<SmoothingPenalty>,
    pub priors: &'a AbundancePriors,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FitFailure {
    message: String,
}

impl FitFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCheck {
    pub detected: bool,
    pub delta_statistic: f64,
}

/// Line-profile / spectral-synthesis fitter. Each call is bounded by the
/// engine's own iteration limit.
pub trait FittingEngine {
    fn fit(&self, model: &SpectralModel, request: &FitRequest<'_>)
        -> Result<FitResult, FitFailure>;

    fn check_detection(
        &self,
        model: &SpectralModel,
        sigma: f64,
    ) -> Result<DetectionCheck, FitFailure>;

    fn find_upper_limit(&self, model: &SpectralModel, sigma: f64) -> Result<f64, FitFailure>;
}

pub trait StellarParameterSystematics {
    fn correlation(&self) -> &CorrelationMatrix;

    fn shifts(&self, id: ModelId, model: &SpectralModel) -> Option<StellarParameterShifts>;
}

#[derive(Debug, Clone, Default)]
pub struct RecordedSystematics {
    correlation: CorrelationMatrix,
}

impl RecordedSystematics {
    pub fn new(correlation: CorrelationMatrix) -> Self {
        Self { correlation }
    }

    pub fn from_population(population: &ModelPopulation) -> AbundanceResult<Self> {
        let correlation = match population.correlation {
            Some(rows) => CorrelationMatrix::from_rows(rows).map_err(|source| {
                AbundanceError::input_validation("INPUT.CORRELATION_MATRIX", source.to_string())
            })?,
            None => CorrelationMatrix::identity(),
        };
        Ok(Self { correlation })
    }
}

impl StellarParameterSystematics for RecordedSystematics {
    fn correlation(&self) -> &CorrelationMatrix {
        &self.correlation
    }

    fn shifts(&self, _id: ModelId, model: &SpectralModel) -> Option<StellarParameterShifts> {
        model.systematics
    }
}
