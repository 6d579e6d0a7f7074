use super::aggregate::{IronReference, SpeciesSummary};
use super::tables::LineRow;
use crate::common::SolarReference;
use crate::domain::{AbundanceResult, ModelPopulation, Species};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

pub fn upper_limit_rows(population: &ModelPopulation) -> Vec<LineRow> {
    population
        .iter()
        .filter(|(_, model)| model.status.is_accepted_upper_limit())
        .map(|(id, model)| LineRow::from_model(id, model))
        .collect()
}

pub fn upper_limit_summary(
    limits: &[LineRow],
    detections: &[SpeciesSummary],
    iron: IronReference,
    solar: &dyn SolarReference,
) -> AbundanceResult<Vec<SpeciesSummary>> {
    let detected = detections
        .iter()
        .map(|row| row.species)
        .collect::<BTreeSet<_>>();

    let mut grouped: BTreeMap<Species, Vec<f64>> = BTreeMap::new();
    for row in limits {
        if detected.contains(&row.species) {
            debug!(
                species = %row.species,
                "upper limit {:.3} superseded by detections",
                row.wavelength
            );
            continue;
        }
        grouped.entry(row.species).or_default().push(row.log_eps);
    }

    let mut rows = Vec::new();
    for (species, values) in grouped {
        let log_eps = if values.iter().any(|value| value.is_nan()) {
            warn!(
                species = %species,
                limits = values.len(),
                "upper limit without a value; writing NaN"
            );
            f64::NAN
        } else {
            values.iter().copied().fold(f64::INFINITY, f64::min)
        };
        let x_h = log_eps - solar.solar_abundance(species)?;
        let row = SpeciesSummary {
            species,
            element: species.element_name(),
            count: values.len(),
            log_eps,
            sigma: f64::NAN,
            stderr: f64::NAN,
            x_h,
            x_fe1: f64::NAN,
            x_fe2: f64::NAN,
            x_fe: f64::NAN,
        };
        rows.push(row.with_iron_reference(iron));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::{upper_limit_rows, upper_limit_summary};
    use crate::common::Asplund2009;
    use crate::domain::{
        FitResult, ModelPopulation, ModelStatus, SpectralModel, Species, StellarParameters,
    };
    use crate::modules::aggregate::{iron_reference, summarize};
    use crate::modules::tables::detection_rows;

    fn limit_status() -> ModelStatus {
        ModelStatus {
            acceptable: true,
            upper_limit: true,
            user_flagged: true,
        }
    }

    fn population() -> ModelPopulation {
        let mut population = ModelPopulation::new(StellarParameters::default());
        population.push(
            SpectralModel::profile(5000.0, Species::FE_I, 1.0, -1.0)
                .with_fit(FitResult::new(7.30, 0.05, 0.2)),
        );
        population.push(
            SpectralModel::profile(5100.0, Species::FE_II, 2.0, -2.0)
                .with_fit(FitResult::new(7.40, 0.05, 0.2)),
        );
        for (wavelength, limit) in [(4129.7, -1.2), (4205.0, -1.5)] {
            population.push(
                SpectralModel::synthesis(wavelength, Species::new(63.1), 0.0, 0.2, Vec::new())
                    .with_fit(FitResult::new(limit, f64::NAN, 0.2))
                    .with_status(limit_status()),
            );
        }
        // Limit for a species that is also detected.
        population.push(
            SpectralModel::synthesis(5711.0, Species::FE_I, 4.3, -1.7, Vec::new())
                .with_fit(FitResult::new(7.9, f64::NAN, 0.2))
                .with_status(limit_status()),
        );
        population
    }

    #[test]
    fn limit_rows_have_nan_errors() {
        let rows = upper_limit_rows(&population());
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.e_stat.is_nan() && row.e_tot.is_nan()));
        assert_eq!(rows[0].log_eps, -1.2);
    }

    #[test]
    fn limits_use_minimum_and_skip_detected_species() {
        let population = population();
        let detections = summarize(&detection_rows(&population), &Asplund2009).unwrap();
        let iron = iron_reference(&detections);
        let limits = upper_limit_rows(&population);

        let rows = upper_limit_summary(&limits, &detections, iron, &Asplund2009)
            .expect("limit summary should build");
        assert_eq!(rows.len(), 1);
        let eu = &rows[0];
        assert_eq!(eu.species, Species::new(63.1));
        assert_eq!(eu.count, 2);
        assert_eq!(eu.log_eps, -1.5);
        assert!(eu.sigma.is_nan() && eu.stderr.is_nan());
        assert!((eu.x_h - (-1.5 - 0.52)).abs() < 1.0e-12);
        assert!((eu.x_fe - (eu.x_h - (7.40 - 7.50))).abs() < 1.0e-12);
    }

    #[test]
    fn limit_without_value_gives_nan_row() {
        let mut population = ModelPopulation::new(StellarParameters::default());
        population.push(
            SpectralModel::profile(5000.0, Species::FE_I, 1.0, -1.0)
                .with_fit(FitResult::new(7.30, 0.05, 0.2)),
        );
        population.push(
            SpectralModel::synthesis(4129.7, Species::new(63.1), 0.0, 0.2, Vec::new())
                .with_status(limit_status()),
        );
        population.push(
            SpectralModel::synthesis(4205.0, Species::new(63.1), 0.0, 0.2, Vec::new())
                .with_fit(FitResult::new(-1.5, f64::NAN, 0.2))
                .with_status(limit_status()),
        );
        let detections = summarize(&detection_rows(&population), &Asplund2009).unwrap();
        let iron = iron_reference(&detections);
        let limits = upper_limit_rows(&population);

        let rows = upper_limit_summary(&limits, &detections, iron, &Asplund2009)
            .expect("limit summary should build");
        assert_eq!(rows.len(), 1);
        let eu = &rows[0];
        assert_eq!(eu.count, 2);
        assert!(eu.log_eps.is_nan());
        assert!(eu.x_h.is_nan() && eu.x_fe1.is_nan() && eu.x_fe.is_nan());
    }
}
