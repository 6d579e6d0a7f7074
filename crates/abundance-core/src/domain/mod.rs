pub mod errors;
pub mod population;

pub use errors::{AbundanceError, AbundanceErrorCategory, AbundanceResult};
pub use population::{ModelPopulation, StatusSnapshot};

use crate::common::elements::{element_symbol, ionization_label};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub const IONIZED_FRACTION_THRESHOLD: f64 = 0.01;

pub const SYNTHESIS_EQW_SENTINEL: f64 = -999.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Species(f64);

impl Species {
    pub const FE_I: Species = Species(26.0);
    pub const FE_II: Species = Species(26.1);

    pub const fn new(code: f64) -> Self {
        Self(code)
    }

    pub const fn code(self) -> f64 {
        self.0
    }

    pub fn atomic_number(self) -> usize {
        self.0.trunc().max(0.0) as usize
    }

    pub fn ionization(self) -> usize {
        ((self.0 - self.0.trunc()) * 10.0).round().max(0.0) as usize
    }

    pub fn is_ionized(self) -> bool {
        self.0 - self.0.trunc() > IONIZED_FRACTION_THRESHOLD
    }

    pub fn element_symbol(self) -> Option<&'static str> {
        element_symbol(self.atomic_number())
    }

    pub fn element_name(self) -> String {
        match (self.element_symbol(), ionization_label(self.ionization())) {
            (Some(symbol), Some(stage)) => format!("{symbol} {stage}"),
            _ => self.to_string(),
        }
    }
}

impl PartialEq for Species {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Species {}

impl PartialOrd for Species {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Species {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Display for Species {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

impl FromStr for Species {
    type Err = AbundanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|code| code.is_finite() && *code >= 1.0)
            .map(Species)
            .ok_or_else(|| {
                AbundanceError::input_validation(
                    "INPUT.SPECIES",
                    format!("invalid species code '{}'", value.trim()),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub usize);

impl Display for ModelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StellarParameters {
    pub effective_temperature: f64,
    pub surface_gravity: f64,
    pub microturbulence: f64,
    pub metallicity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StellarParameterShifts {
    pub effective_temperature: f64,
    pub surface_gravity: f64,
    pub microturbulence: f64,
    pub metallicity: f64,
}

impl StellarParameterShifts {
    pub const fn as_array(&self) -> [f64; 4] {
        [
            self.effective_temperature,
            self.surface_gravity,
            self.microturbulence,
            self.metallicity,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Profile {
        #[serde(default)]
        equivalent_width: Option<f64>,
        #[serde(default)]
        equivalent_width_error: Option<f64>,
    },
    Synthesis {
        fitted_elements: Vec<String>,
        #[serde(default)]
        reference_elements: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelStatus {
    pub acceptable: bool,
    pub upper_limit: bool,
    pub user_flagged: bool,
}

impl ModelStatus {
    pub const fn detection() -> Self {
        Self {
            acceptable: true,
            upper_limit: false,
            user_flagged: false,
        }
    }

    pub fn reject_and_flag(&mut self) {
        self.acceptable = false;
        self.user_flagged = true;
    }

    pub fn accept_upper_limit(&mut self) {
        self.acceptable = true;
        self.upper_limit = true;
    }

    pub const fn is_detection(&self) -> bool {
        self.acceptable && !self.upper_limit
    }

    pub const fn is_accepted_upper_limit(&self) -> bool {
        self.acceptable && self.upper_limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    #[serde(deserialize_with = "number_or_nan")]
    pub log_eps: f64,
    #[serde(deserialize_with = "number_or_nan")]
    pub stat_error: f64,
    #[serde(default)]
    pub covariance_error: Option<f64>,
    #[serde(deserialize_with = "number_or_nan")]
    pub fwhm: f64,
}

impl FitResult {
    pub const fn new(log_eps: f64, stat_error: f64, fwhm: f64) -> Self {
        Self {
            log_eps,
            stat_error,
            covariance_error: None,
            fwhm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralModel {
    pub wavelength: f64,
    pub species: Species,
    #[serde(default = "nan", deserialize_with = "number_or_nan")]
    pub expot: f64,
    #[serde(default = "nan", deserialize_with = "number_or_nan")]
    pub loggf: f64,
    #[serde(flatten)]
    pub kind: ModelKind,
    #[serde(default)]
    pub status: ModelStatus,
    #[serde(default)]
    pub fit: Option<FitResult>,
    #[serde(default)]
    pub systematics: Option<StellarParameterShifts>,
}

fn nan() -> f64 {
    f64::NAN
}

// serde_json writes non-finite floats as `null`.
fn number_or_nan<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl SpectralModel {
    pub fn profile(wavelength: f64, species: Species, expot: f64, loggf: f64) -> Self {
        Self {
            wavelength,
            species,
            expot,
            loggf,
            kind: ModelKind::Profile {
                equivalent_width: None,
                equivalent_width_error: None,
            },
            status: ModelStatus::default(),
            fit: None,
            systematics: None,
        }
    }

    pub fn synthesis(
        wavelength: f64,
        species: Species,
        expot: f64,
        loggf: f64,
        reference_elements: Vec<String>,
    ) -> Self {
        let fitted_elements = species
            .element_symbol()
            .map(|symbol| vec![symbol.to_string()])
            .unwrap_or_default();
        Self {
            wavelength,
            species,
            expot,
            loggf,
            kind: ModelKind::Synthesis {
                fitted_elements,
                reference_elements,
            },
            status: ModelStatus::default(),
            fit: None,
            systematics: None,
        }
    }

    pub fn with_fit(mut self, fit: FitResult) -> Self {
        self.fit = Some(fit);
        self.status.acceptable = true;
        self
    }

    pub fn with_status(mut self, status: ModelStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_systematics(mut self, shifts: StellarParameterShifts) -> Self {
        self.systematics = Some(shifts);
        self
    }

    pub fn with_equivalent_width(mut self, width: f64, error: f64) -> Self {
        if let ModelKind::Profile {
            equivalent_width,
            equivalent_width_error,
        } = &mut self.kind
        {
            *equivalent_width = Some(width);
            *equivalent_width_error = Some(error);
        }
        self
    }

    pub fn is_synthesis(&self) -> bool {
        matches!(self.kind, ModelKind::Synthesis { .. })
    }

    pub fn fitted_abundance(&self) -> Option<f64> {
        self.fit.map(|fit| fit.log_eps)
    }

    pub fn statistical_error(&self) -> Option<f64> {
        self.fit.map(|fit| fit.stat_error)
    }

    pub fn fwhm(&self) -> Option<f64> {
        self.fit.map(|fit| fit.fwhm)
    }

    pub fn is_upper_limit(&self) -> bool {
        self.status.upper_limit
    }

    pub fn is_acceptable(&self) -> bool {
        self.status.acceptable
    }

    /// Equivalent width and its error as written to the line table: NaN when
    /// a profile fit has none, the synthesis sentinel otherwise.
    pub fn equivalent_width_columns(&self) -> (f64, f64) {
        match &self.kind {
            ModelKind::Profile {
                equivalent_width,
                equivalent_width_error,
            } => (
                equivalent_width.unwrap_or(f64::NAN),
                equivalent_width_error.unwrap_or(f64::NAN),
            ),
            ModelKind::Synthesis { .. } => (SYNTHESIS_EQW_SENTINEL, SYNTHESIS_EQW_SENTINEL),
        }
    }

    pub fn fitted_elements(&self) -> &[String] {
        match &self.kind {
            ModelKind::Synthesis {
                fitted_elements, ..
            } => fitted_elements,
            ModelKind::Profile { .. } => &[],
        }
    }

    pub fn reference_elements(&self) -> &[String] {
        match &self.kind {
            ModelKind::Synthesis {
                reference_elements,
                ..
            } => reference_elements,
            ModelKind::Profile { .. } => &[],
        }
    }
}
