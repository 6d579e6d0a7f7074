use crate::common::SolarReference;
use crate::domain::{AbundanceResult, SpectralModel};
use crate::modules::aggregate::ElementAbundance;
use std::collections::BTreeMap;
use tracing::debug;

const ALPHA_ANCHORED: [&str; 4] = ["O", "Si", "Ca", "Ti"];

/// Solar-system r-process [X/Eu] pattern (Sneden, Cowan & Gallino 2008).
const RPROCESS_EU_OFFSETS: [(&str, f64); 24] = [
    ("Sr", -0.95),
    ("Y", -0.54),
    ("Zr", -0.71),
    ("Nb", -0.48),
    ("Mo", -0.47),
    ("Ru", -0.18),
    ("Rh", -0.07),
    ("Ba", -0.83),
    ("La", -0.60),
    ("Ce", -0.71),
    ("Pr", -0.28),
    ("Nd", -0.36),
    ("Sm", -0.14),
    ("Gd", -0.07),
    ("Tb", -0.02),
    ("Dy", -0.05),
    ("Ho", -0.02),
    ("Er", -0.06),
    ("Tm", -0.07),
    ("Yb", -0.16),
    ("Lu", -0.08),
    ("Hf", -0.27),
    ("Os", -0.03),
    ("Ir", 0.00),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorStrategy {
    Metallicity,
    Anchored,
}

impl PriorStrategy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Metallicity => "metallicity",
            Self::Anchored => "anchored",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbundancePriors {
    pub reference: BTreeMap<String, f64>,
    pub fitted: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorClips {
    pub alpha: f64,
    pub rprocess: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSnapshot {
    elements: BTreeMap<String, ElementAbundance>,
    metallicity: f64,
}

impl ElementSnapshot {
    pub fn new(elements: BTreeMap<String, ElementAbundance>, metallicity: f64) -> Self {
        Self {
            elements,
            metallicity,
        }
    }

    pub fn metallicity(&self) -> f64 {
        self.metallicity
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn measured(&self, symbol: &str) -> Option<f64> {
        self.elements
            .get(symbol)
            .map(|element| element.log_eps)
            .filter(|value| value.is_finite())
    }

    fn x_h(&self, symbol: &str) -> f64 {
        self.elements
            .get(symbol)
            .map(|element| element.x_h)
            .unwrap_or(f64::NAN)
    }

    pub fn anchored_offset(&self, symbol: &str, clips: AnchorClips) -> f64 {
        let metallicity = self.metallicity;
        if ALPHA_ANCHORED.contains(&symbol) {
            return clipped_anchor(self.x_h("Mg") - metallicity, clips.alpha);
        }
        match symbol {
            "Cr" => 0.144 + 0.129 * metallicity,
            "Mn" => -0.234 + 0.096 * metallicity,
            _ => RPROCESS_EU_OFFSETS
                .iter()
                .find(|(element, _)| *element == symbol)
                .map(|(_, offset)| {
                    clipped_anchor(self.x_h("Eu") - metallicity, clips.rprocess) + offset
                })
                .unwrap_or(0.0),
        }
    }
}

fn clipped_anchor(value: f64, bound: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-bound, bound)
    }
}

pub fn reference_prior(
    symbol: &str,
    strategy: PriorStrategy,
    snapshot: &ElementSnapshot,
    solar: &dyn SolarReference,
    clips: AnchorClips,
) -> AbundanceResult<f64> {
    if let Some(measured) = snapshot.measured(symbol) {
        return Ok(measured);
    }
    let base = solar.solar_abundance_for_element(symbol)? + snapshot.metallicity();
    Ok(match strategy {
        PriorStrategy::Metallicity => base,
        PriorStrategy::Anchored => base + snapshot.anchored_offset(symbol, clips),
    })
}

pub fn priors_for_model(
    model: &SpectralModel,
    strategy: PriorStrategy,
    snapshot: &ElementSnapshot,
    solar: &dyn SolarReference,
    clips: AnchorClips,
) -> AbundanceResult<AbundancePriors> {
    let mut priors = AbundancePriors::default();
    for symbol in model.reference_elements() {
        let value = reference_prior(symbol, strategy, snapshot, solar, clips)?;
        priors.reference.insert(symbol.clone(), value);
    }

    if model.fit.is_some() {
        for symbol in model.fitted_elements() {
            let value = snapshot.measured(symbol).unwrap_or_else(|| {
                debug!(
                    element = %symbol,
                    "no measured abundance to pin fitted element; using NaN"
                );
                f64::NAN
            });
            priors.fitted.insert(symbol.clone(), value);
        }
    }
    Ok(priors)
}
