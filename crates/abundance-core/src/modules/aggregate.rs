use super::tables::LineRow;
use crate::common::SolarReference;
use crate::domain::{AbundanceResult, ModelPopulation, Species};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesSummary {
    pub species: Species,
    pub element: String,
    pub count: usize,
    pub log_eps: f64,
    pub sigma: f64,
    pub stderr: f64,
    pub x_h: f64,
    pub x_fe1: f64,
    pub x_fe2: f64,
    pub x_fe: f64,
}

impl SpeciesSummary {
    pub(crate) fn with_iron_reference(mut self, iron: IronReference) -> Self {
        self.x_fe1 = self.x_h - iron.fe1;
        self.x_fe2 = self.x_h - iron.fe2;
        self.x_fe = if self.species.is_ionized() {
            self.x_fe2
        } else {
            self.x_fe1
        };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IronReference {
    pub fe1: f64,
    pub fe2: f64,
}

pub fn iron_reference(rows: &[SpeciesSummary]) -> IronReference {
    let x_h_for = |species: Species| {
        rows.iter()
            .find(|row| row.species == species)
            .map(|row| row.x_h)
    };

    let fe1 = x_h_for(Species::FE_I).unwrap_or_else(|| {
        debug!("no Fe I row: [X/Fe1] reference set to NaN");
        f64::NAN
    });
    let fe2 = x_h_for(Species::FE_II).unwrap_or_else(|| {
        debug!("no Fe II row: [X/Fe2] reference falls back to Fe I");
        fe1
    });
    IronReference { fe1, fe2 }
}

pub fn summarize(
    lines: &[LineRow],
    solar: &dyn SolarReference,
) -> AbundanceResult<Vec<SpeciesSummary>> {
    let mut rows = Vec::new();
    for (species, group) in group_by_species(lines) {
        let values = group.iter().map(|row| row.log_eps).collect::<Vec<_>>();
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / count as f64;
        let sigma = variance.sqrt();

        rows.push(species_row(
            species,
            count,
            mean,
            sigma,
            sigma / (count as f64).sqrt(),
            solar,
        )?);
    }
    Ok(attach_iron_reference(rows))
}

/// Inverse-variance weighted summary over lines carrying a finite, positive
/// `weight`. Lines without one are left out of their species' statistics.
pub fn summarize_weighted(
    lines: &[LineRow],
    solar: &dyn SolarReference,
) -> AbundanceResult<Vec<SpeciesSummary>> {
    let mut rows = Vec::new();
    for (species, group) in group_by_species(lines) {
        let usable = group
            .iter()
            .filter(|row| row.weight.is_finite() && row.weight > 0.0 && row.log_eps.is_finite())
            .collect::<Vec<_>>();
        if usable.len() < group.len() {
            warn!(
                species = %species,
                skipped = group.len() - usable.len(),
                "lines without a usable weight left out of the weighted mean"
            );
        }

        let weight_sum = usable.iter().map(|row| row.weight).sum::<f64>();
        let (mean, sigma, stderr) = if usable.is_empty() {
            (f64::NAN, f64::NAN, f64::NAN)
        } else {
            let mean = usable
                .iter()
                .map(|row| row.weight * row.log_eps)
                .sum::<f64>()
                / weight_sum;
            let variance = usable
                .iter()
                .map(|row| row.weight * (row.log_eps - mean).powi(2))
                .sum::<f64>()
                / weight_sum;
            (mean, variance.sqrt(), weight_sum.sqrt().recip())
        };

        rows.push(species_row(
            species,
            usable.len(),
            mean,
            sigma,
            stderr,
            solar,
        )?);
    }
    Ok(attach_iron_reference(rows))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementAbundance {
    pub count: usize,
    pub log_eps: f64,
    pub x_h: f64,
}

pub fn element_abundances(
    lines: &[LineRow],
    solar: &dyn SolarReference,
) -> AbundanceResult<BTreeMap<String, ElementAbundance>> {
    reduce_by_element(lines.iter().map(|row| (row.species, row.log_eps)), solar)
}

pub fn population_element_abundances(
    population: &ModelPopulation,
    solar: &dyn SolarReference,
) -> AbundanceResult<BTreeMap<String, ElementAbundance>> {
    reduce_by_element(
        population
            .iter()
            .filter(|(_, model)| model.status.is_detection())
            .filter_map(|(_, model)| Some((model.species, model.fitted_abundance()?))),
        solar,
    )
}

fn reduce_by_element(
    measurements: impl IntoIterator<Item = (Species, f64)>,
    solar: &dyn SolarReference,
) -> AbundanceResult<BTreeMap<String, ElementAbundance>> {
    let mut grouped: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
    for (species, log_eps) in measurements {
        if !log_eps.is_finite() {
            continue;
        }
        match species.element_symbol() {
            Some(symbol) => grouped.entry(symbol).or_default().push(log_eps),
            None => debug!(species = %species, "species has no element; skipped"),
        }
    }

    let mut abundances = BTreeMap::new();
    for (symbol, values) in grouped {
        let log_eps = values.iter().sum::<f64>() / values.len() as f64;
        let x_h = log_eps - solar.solar_abundance_for_element(symbol)?;
        abundances.insert(
            symbol.to_string(),
            ElementAbundance {
                count: values.len(),
                log_eps,
                x_h,
            },
        );
    }
    Ok(abundances)
}

fn group_by_species(lines: &[LineRow]) -> BTreeMap<Species, Vec<&LineRow>> {
    let mut grouped: BTreeMap<Species, Vec<&LineRow>> = BTreeMap::new();
    for row in lines {
        grouped.entry(row.species).or_default().push(row);
    }
    grouped
}

fn species_row(
    species: Species,
    count: usize,
    log_eps: f64,
    sigma: f64,
    stderr: f64,
    solar: &dyn SolarReference,
) -> AbundanceResult<SpeciesSummary> {
    let x_h = log_eps - solar.solar_abundance(species)?;
    Ok(SpeciesSummary {
        species,
        element: species.element_name(),
        count,
        log_eps,
        sigma,
        stderr,
        x_h,
        x_fe1: f64::NAN,
        x_fe2: f64::NAN,
        x_fe: f64::NAN,
    })
}

fn attach_iron_reference(rows: Vec<SpeciesSummary>) -> Vec<SpeciesSummary> {
    let iron = iron_reference(&rows);
    rows.into_iter()
        .map(|row| row.with_iron_reference(iron))
        .collect()
}
