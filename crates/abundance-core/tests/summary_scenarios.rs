use abundance_core::common::{Asplund2009, RunConfig, SolarReference, SummaryConfig};
use abundance_core::domain::{
    AbundanceError, AbundanceResult, FitResult, ModelPopulation, ModelStatus, SpectralModel,
    Species, StellarParameterShifts, StellarParameters,
};
use abundance_core::modules::{
    build_tables, summarize, write_summary, RecordedSystematics,
};
use abundance_core::modules::tables::detection_rows;
use std::fs;
use tempfile::TempDir;

struct FlatSolar;

impl SolarReference for FlatSolar {
    fn solar_abundance(&self, _species: Species) -> AbundanceResult<f64> {
        Ok(7.50)
    }

    fn solar_abundance_for_element(&self, symbol: &str) -> AbundanceResult<f64> {
        if symbol.is_empty() {
            return Err(AbundanceError::input_validation(
                "INPUT.UNKNOWN_ELEMENT",
                "empty element symbol",
            ));
        }
        Ok(7.50)
    }
}

fn shifts() -> StellarParameterShifts {
    StellarParameterShifts {
        effective_temperature: 0.08,
        surface_gravity: 0.01,
        microturbulence: 0.04,
        metallicity: 0.01,
    }
}

fn iron_population() -> ModelPopulation {
    let mut population = ModelPopulation::new(StellarParameters {
        effective_temperature: 5000.0,
        surface_gravity: 2.5,
        microturbulence: 1.5,
        metallicity: 0.0,
    });
    for (wavelength, species, log_eps, stat) in [
        (5225.5, Species::FE_I, 7.40, 0.05),
        (5247.0, Species::FE_I, 7.50, 0.05),
        (5234.6, Species::FE_II, 7.55, 0.08),
    ] {
        population.push(
            SpectralModel::profile(wavelength, species, 2.0, -2.0)
                .with_fit(FitResult::new(log_eps, stat, 0.15))
                .with_equivalent_width(50.0, 2.0)
                .with_systematics(shifts()),
        );
    }
    population
}

fn close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1.0e-9
}

#[test]
fn neutral_and_ionized_iron_reference_themselves() {
    let population = iron_population();
    let rows = summarize(&detection_rows(&population), &FlatSolar).expect("summary");
    assert_eq!(rows.len(), 2);

    let fe1 = &rows[0];
    assert_eq!(fe1.species, Species::FE_I);
    assert_eq!(fe1.count, 2);
    assert!(close(fe1.log_eps, 7.45));
    assert!(close(fe1.x_h, -0.05));
    assert!(close(fe1.x_fe, 0.0));

    let fe2 = &rows[1];
    assert_eq!(fe2.count, 1);
    assert!(close(fe2.x_h, 0.05));
    assert!(close(fe2.x_fe, 0.0));
}

#[test]
fn summary_is_identical_on_repeated_calls() {
    let population = iron_population();
    let config = SummaryConfig::default();
    let systematics = RecordedSystematics::from_population(&population).unwrap();
    let first = build_tables(&population, &Asplund2009, &systematics, &config).unwrap();
    let second = build_tables(&population, &Asplund2009, &systematics, &config).unwrap();

    assert_eq!(first.species.len(), second.species.len());
    for (left, right) in first.species.iter().zip(&second.species) {
        assert_eq!(left.log_eps.to_bits(), right.log_eps.to_bits());
        assert_eq!(left.x_fe.to_bits(), right.x_fe.to_bits());
    }
    for (left, right) in first.lines.iter().zip(&second.lines) {
        assert_eq!(left.weight.to_bits(), right.weight.to_bits());
    }
}

#[test]
fn full_budget_weights_are_inverse_total_variance() {
    let population = iron_population();
    let systematics = RecordedSystematics::from_population(&population).unwrap();
    let tables =
        build_tables(&population, &Asplund2009, &systematics, &SummaryConfig::default()).unwrap();

    for row in &tables.lines {
        assert!(row.e_tot >= row.e_stat);
        assert!(row.e_tot >= row.e_sys);
        assert!(row.e_tot >= row.e_teff.abs());
        assert!((row.weight - row.e_tot.powi(-2)).abs() < 1.0e-9);
    }
}

#[test]
fn upper_limits_never_duplicate_detected_species() {
    let mut population = iron_population();
    let limit = ModelStatus {
        acceptable: true,
        upper_limit: true,
        user_flagged: true,
    };
    for (wavelength, species, value) in [
        (5000.0, Species::FE_I, 7.9),
        (4129.7, Species::new(63.1), -1.1),
        (4205.0, Species::new(63.1), -1.4),
    ] {
        population.push(
            SpectralModel::synthesis(wavelength, species, 0.0, 0.1, Vec::new())
                .with_fit(FitResult::new(value, f64::NAN, 0.2))
                .with_status(limit),
        );
    }

    let systematics = RecordedSystematics::from_population(&population).unwrap();
    let tables =
        build_tables(&population, &Asplund2009, &systematics, &SummaryConfig::default()).unwrap();

    let fe_rows = tables
        .species
        .iter()
        .filter(|row| row.species == Species::FE_I)
        .count();
    assert_eq!(fe_rows, 1);
    let eu = tables
        .species
        .iter()
        .find(|row| row.species == Species::new(63.1))
        .expect("Eu II limit row");
    assert_eq!(eu.count, 2);
    assert_eq!(eu.log_eps, -1.4);
    assert_eq!(tables.lines.len(), 6);
}

#[test]
fn rejected_models_stay_in_population_but_not_in_tables() {
    let mut population = iron_population();
    population.push(
        SpectralModel::profile(6000.0, Species::FE_I, 2.0, -2.0)
            .with_fit(FitResult::new(9.0, 0.05, 0.15))
            .with_status(ModelStatus {
                acceptable: false,
                upper_limit: false,
                user_flagged: true,
            }),
    );
    let tables = build_tables(
        &population,
        &Asplund2009,
        &RecordedSystematics::default(),
        &SummaryConfig::default(),
    )
    .unwrap();
    assert_eq!(population.len(), 4);
    assert_eq!(tables.lines.len(), 3);
    assert!(close(tables.species[0].log_eps, 7.45));
}

#[test]
fn tables_are_written_with_configured_names() {
    let temp = TempDir::new().expect("tempdir should be created");
    let population = iron_population();
    let config = RunConfig {
        output_name: "HD122563".to_string(),
        output_directory: temp.path().join("out"),
        ..RunConfig::default()
    };
    let systematics = RecordedSystematics::from_population(&population).unwrap();
    let written = write_summary(&population, &Asplund2009, &systematics, &config).unwrap();

    assert!(written.line_table.ends_with("HD122563_summary_lines.txt"));
    assert!(written.summary_table.ends_with("HD122563_summary_abunds.txt"));
    let lines = fs::read_to_string(&written.line_table).unwrap();
    assert_eq!(lines.lines().count(), 5);
    assert!(lines.lines().next().unwrap().contains("weight"));
    let summary = fs::read_to_string(&written.summary_table).unwrap();
    assert!(summary.contains("Fe II"));
}
