use super::aggregate::SpeciesSummary;
use super::uncertainty::ErrorBudget;
use crate::domain::{AbundanceError, AbundanceResult, ModelId, ModelPopulation, SpectralModel, Species};
use std::fs;
use std::path::Path;
use tracing::warn;

pub const LINE_TABLE_COLUMNS: [&str; 17] = [
    "index",
    "wavelength",
    "species",
    "expot",
    "loggf",
    "logeps",
    "e_stat",
    "eqw",
    "e_eqw",
    "fwhm",
    "e_Teff",
    "e_logg",
    "e_vt",
    "e_MH",
    "e_sys",
    "e_tot",
    "weight",
];

pub const SUMMARY_TABLE_COLUMNS: [&str; 10] = [
    "species", "elem", "N", "logeps", "sigma", "stderr", "[X/H]", "[X/Fe1]", "[X/Fe2]", "[X/Fe]",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineRow {
    pub index: ModelId,
    pub wavelength: f64,
    pub species: Species,
    pub expot: f64,
    pub loggf: f64,
    pub log_eps: f64,
    pub e_stat: f64,
    pub eqw: f64,
    pub e_eqw: f64,
    pub fwhm: f64,
    pub e_teff: f64,
    pub e_logg: f64,
    pub e_vt: f64,
    pub e_mh: f64,
    pub e_sys: f64,
    pub e_tot: f64,
    pub weight: f64,
}

impl LineRow {
    pub fn from_model(index: ModelId, model: &SpectralModel) -> Self {
        if !model.expot.is_finite() || !model.loggf.is_finite() {
            warn!(
                model = %index,
                species = %model.species,
                "line {:.3} is missing expot or loggf",
                model.wavelength
            );
        }
        let (log_eps, fwhm) = match model.fit {
            Some(fit) => (fit.log_eps, fit.fwhm),
            None => {
                warn!(
                    model = %index,
                    species = %model.species,
                    "line {:.3} has no fitted result; writing NaN abundance",
                    model.wavelength
                );
                (f64::NAN, f64::NAN)
            }
        };
        let (eqw, e_eqw) = model.equivalent_width_columns();

        Self {
            index,
            wavelength: model.wavelength,
            species: model.species,
            expot: model.expot,
            loggf: model.loggf,
            log_eps,
            e_stat: f64::NAN,
            eqw,
            e_eqw,
            fwhm,
            e_teff: f64::NAN,
            e_logg: f64::NAN,
            e_vt: f64::NAN,
            e_mh: f64::NAN,
            e_sys: f64::NAN,
            e_tot: f64::NAN,
            weight: f64::NAN,
        }
    }

    pub fn apply_budget(&mut self, budget: &ErrorBudget) {
        self.e_stat = budget.stat;
        [self.e_teff, self.e_logg, self.e_vt, self.e_mh] = budget.shifts;
        self.e_sys = budget.scatter;
        self.e_tot = budget.total;
        self.weight = budget.weight;
    }
}

pub fn detection_rows(population: &ModelPopulation) -> Vec<LineRow> {
    population
        .iter()
        .filter(|(_, model)| model.status.is_detection())
        .map(|(id, model)| LineRow::from_model(id, model))
        .collect()
}

pub fn render_line_table(rows: &[LineRow]) -> String {
    let cells = rows
        .iter()
        .map(|row| {
            vec![
                row.index.0.to_string(),
                format_float(row.wavelength, 3),
                format_float(row.species.code(), 1),
                format_float(row.expot, 3),
                format_float(row.loggf, 3),
                format_float(row.log_eps, 3),
                format_float(row.e_stat, 3),
                format_float(row.eqw, 3),
                format_float(row.e_eqw, 3),
                format_float(row.fwhm, 3),
                format_float(row.e_teff, 3),
                format_float(row.e_logg, 3),
                format_float(row.e_vt, 3),
                format_float(row.e_mh, 3),
                format_float(row.e_sys, 3),
                format_float(row.e_tot, 3),
                format_float(row.weight, 3),
            ]
        })
        .collect::<Vec<_>>();
    render_fixed_width(&LINE_TABLE_COLUMNS, &cells)
}

pub fn render_summary_table(rows: &[SpeciesSummary]) -> String {
    let cells = rows
        .iter()
        .map(|row| {
            vec![
                format_float(row.species.code(), 1),
                row.element.clone(),
                row.count.to_string(),
                format_float(row.log_eps, 2),
                format_float(row.sigma, 2),
                format_float(row.stderr, 2),
                format_float(row.x_h, 2),
                format_float(row.x_fe1, 2),
                format_float(row.x_fe2, 2),
                format_float(row.x_fe, 2),
            ]
        })
        .collect::<Vec<_>>();
    render_fixed_width(&SUMMARY_TABLE_COLUMNS, &cells)
}

pub fn write_table(path: &Path, contents: &str) -> AbundanceResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| {
            AbundanceError::io_system(
                "IO.TABLE_DIRECTORY",
                format!(
                    "failed to create table directory '{}': {}",
                    parent.display(),
                    source
                ),
            )
        })?;
    }
    fs::write(path, contents).map_err(|source| {
        AbundanceError::io_system(
            "IO.TABLE_WRITE",
            format!("failed to write table '{}': {}", path.display(), source),
        )
    })
}

fn format_float(value: f64, precision: usize) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let label = if value > 0.0 { "inf" } else { "-inf" };
        label.to_string()
    } else {
        format!("{:.*}", precision, value)
    }
}

fn render_fixed_width(columns: &[&str], rows: &[Vec<String>]) -> String {
    let widths = columns
        .iter()
        .enumerate()
        .map(|(index, name)| {
            rows.iter()
                .map(|row| row[index].len())
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();

    let mut rendered = String::new();
    let header = columns
        .iter()
        .zip(&widths)
        .map(|(name, width)| format!("{:>width$}", name, width = *width))
        .collect::<Vec<_>>();
    rendered.push_str(&header.join(" "));
    rendered.push('\n');

    let rule = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>();
    rendered.push_str(&rule.join(" "));
    rendered.push('\n');

    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
            .collect::<Vec<_>>();
        rendered.push_str(&line.join(" "));
        rendered.push('\n');
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::{detection_rows, render_line_table, render_summary_table, LineRow};
    use crate::domain::{
        FitResult, ModelId, ModelPopulation, ModelStatus, SpectralModel, Species,
        StellarParameters, SYNTHESIS_EQW_SENTINEL,
    };
    use crate::modules::aggregate::SpeciesSummary;

    #[test]
    fn detection_rows_skip_rejected_and_upper_limits() {
        let mut population = ModelPopulation::new(StellarParameters::default());
        population.push(
            SpectralModel::profile(5000.0, Species::FE_I, 1.0, -1.0)
                .with_fit(FitResult::new(7.4, 0.05, 0.2)),
        );
        population.push(
            SpectralModel::profile(5001.0, Species::FE_I, 1.0, -1.0)
                .with_fit(FitResult::new(7.5, 0.05, 0.2))
                .with_status(ModelStatus::default()),
        );
        let mut limit = ModelStatus::detection();
        limit.upper_limit = true;
        population.push(
            SpectralModel::synthesis(4554.0, Species::new(56.1), 0.0, 0.17, Vec::new())
                .with_fit(FitResult::new(-1.2, 0.1, 0.2))
                .with_status(limit),
        );

        let rows = detection_rows(&population);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index, ModelId(0));
        assert!(rows[0].e_stat.is_nan());
    }

    #[test]
    fn synthesis_rows_carry_eqw_sentinel() {
        let model = SpectralModel::synthesis(4554.0, Species::new(56.1), 0.0, 0.17, Vec::new())
            .with_fit(FitResult::new(-1.2, 0.1, 0.2));
        let row = LineRow::from_model(ModelId(7), &model);
        assert_eq!(row.eqw, SYNTHESIS_EQW_SENTINEL);
        assert_eq!(row.e_eqw, SYNTHESIS_EQW_SENTINEL);
        assert_eq!(row.log_eps, -1.2);
    }

    #[test]
    fn fixed_width_rendering_has_header_rule_and_nan_cells() {
        let model = SpectralModel::profile(5000.0, Species::FE_I, 1.0, -1.0)
            .with_fit(FitResult::new(7.4, 0.05, 0.2));
        let rendered = render_line_table(&[LineRow::from_model(ModelId(3), &model)]);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].trim_start().starts_with("index"));
        assert!(lines[1].chars().all(|c| c == '-' || c == ' '));
        assert_eq!(lines[0].len(), lines[1].len());
        assert_eq!(lines[0].len(), lines[2].len());
        assert!(lines[2].contains("5000.000"));
        assert!(lines[2].contains("nan"));
    }

    #[test]
    fn empty_summary_still_renders_every_column() {
        let rendered = render_summary_table(&[] as &[SpeciesSummary]);
        let header = rendered.lines().next().expect("header line");
        for column in ["[X/Fe]", "[X/Fe1]", "[X/Fe2]"] {
            assert!(header.contains(column));
        }
        assert_eq!(rendered.lines().count(), 2);
    }
}
