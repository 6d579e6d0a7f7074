use super::elements::{atomic_number_for_symbol, MAX_ATOMIC_NUMBER};
use crate::domain::{AbundanceError, AbundanceResult, Species};

pub trait SolarReference {
    fn solar_abundance(&self, species: Species) -> AbundanceResult<f64>;

    fn solar_abundance_for_element(&self, symbol: &str) -> AbundanceResult<f64> {
        let atomic_number = atomic_number_for_symbol(symbol).ok_or_else(|| {
            AbundanceError::input_validation(
                "INPUT.UNKNOWN_ELEMENT",
                format!("unknown element symbol '{}'", symbol),
            )
        })?;
        self.solar_abundance(Species::new(atomic_number as f64))
    }
}

const NO_VALUE: f64 = f64::NAN;

const ASPLUND_2009: [f64; 92] = [
    12.00, 10.93, 1.05, 1.38, 2.70, 8.43, 7.83, 8.69, 4.56, 7.93, // H-Ne
    6.24, 7.60, 6.45, 7.51, 5.41, 7.12, 5.50, 6.40, 5.03, 6.34, // Na-Ca
    3.15, 4.95, 3.93, 5.64, 5.43, 7.50, 4.99, 6.22, 4.19, 4.56, // Sc-Zn
    3.04, 3.65, 2.30, 3.34, 2.54, 3.25, 2.52, 2.87, 2.21, 2.58, // Ga-Zr
    1.46, 1.88, NO_VALUE, 1.75, 0.91, 1.57, 0.94, 1.71, 0.80, 2.04, // Nb-Sn
    1.01, 2.18, 1.55, 2.24, 1.08, 2.18, 1.10, 1.58, 0.72, 1.42, // Sb-Nd
    NO_VALUE, 0.96, 0.52, 1.07, 0.30, 1.10, 0.48, 0.92, 0.10, 0.84, // Pm-Yb
    0.10, 0.85, -0.12, 0.85, 0.26, 1.40, 1.38, 1.62, 0.92, 1.17, // Lu-Hg
    0.90, 1.75, 0.65, NO_VALUE, NO_VALUE, NO_VALUE, NO_VALUE, NO_VALUE, NO_VALUE, 0.02, // Tl-Th
    NO_VALUE, -0.54, // Pa-U
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Asplund2009;

impl SolarReference for Asplund2009 {
    fn solar_abundance(&self, species: Species) -> AbundanceResult<f64> {
        let atomic_number = species.atomic_number();
        let value = (1..=MAX_ATOMIC_NUMBER)
            .contains(&atomic_number)
            .then(|| ASPLUND_2009.get(atomic_number - 1).copied())
            .flatten()
            .filter(|value| value.is_finite());

        value.ok_or_else(|| {
            AbundanceError::input_validation(
                "INPUT.UNKNOWN_SPECIES",
                format!("no solar abundance for species {}", species),
            )
        })
    }
}
