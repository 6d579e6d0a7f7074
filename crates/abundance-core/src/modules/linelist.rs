use crate::common::elements::atomic_number_for_symbol;
use crate::domain::{AbundanceError, AbundanceResult, ModelPopulation, SpectralModel, Species};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct LineListEntry {
    pub wavelength: f64,
    pub species: Species,
    pub expot: f64,
    pub loggf: f64,
    pub reference_elements: Vec<String>,
}

impl LineListEntry {
    pub fn to_model(&self) -> SpectralModel {
        SpectralModel::synthesis(
            self.wavelength,
            self.species,
            self.expot,
            self.loggf,
            self.reference_elements.clone(),
        )
    }
}

pub fn parse_line_list(source: &str) -> AbundanceResult<Vec<LineListEntry>> {
    let mut entries = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        entries.push(parse_entry(index + 1, content)?);
    }
    Ok(entries)
}

fn parse_entry(line_number: usize, content: &str) -> AbundanceResult<LineListEntry> {
    let tokens = content.split_whitespace().collect::<Vec<_>>();
    if !(4..=5).contains(&tokens.len()) {
        return Err(invalid_row(
            line_number,
            format!("expected 4 or 5 columns, found {}", tokens.len()),
        ));
    }

    let number = |token: &str, column: &str| {
        token
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| invalid_row(line_number, format!("{column} '{token}' is not a number")))
    };
    let wavelength = number(tokens[0], "wavelength")?;
    if wavelength <= 0.0 {
        return Err(invalid_row(line_number, "wavelength must be positive".to_string()));
    }
    let species = tokens[1]
        .parse::<Species>()
        .map_err(|error| invalid_row(line_number, error.message().to_string()))?;
    let expot = number(tokens[2], "expot")?;
    let loggf = number(tokens[3], "loggf")?;

    let mut reference_elements = Vec::new();
    if let Some(list) = tokens.get(4) {
        for symbol in list.split(',').filter(|symbol| !symbol.is_empty()) {
            if atomic_number_for_symbol(symbol).is_none() {
                return Err(invalid_row(
                    line_number,
                    format!("unknown reference element '{symbol}'"),
                ));
            }
            reference_elements.push(symbol.to_string());
        }
    }

    Ok(LineListEntry {
        wavelength,
        species,
        expot,
        loggf,
        reference_elements,
    })
}

fn invalid_row(line_number: usize, reason: String) -> AbundanceError {
    AbundanceError::input_validation(
        "INPUT.LINE_LIST_ROW",
        format!("line list row {line_number}: {reason}"),
    )
}

pub fn load_line_list(path: &Path) -> AbundanceResult<Vec<LineListEntry>> {
    let source = fs::read_to_string(path).map_err(|source| {
        AbundanceError::io_system(
            "IO.LINE_LIST_READ",
            format!("failed to read line list '{}': {}", path.display(), source),
        )
    })?;
    parse_line_list(&source)
}

pub fn import_line_list(population: &mut ModelPopulation, path: &Path) -> AbundanceResult<usize> {
    let entries = load_line_list(path)?;
    for entry in &entries {
        population.push(entry.to_model());
    }
    info!(
        added = entries.len(),
        path = %path.display(),
        "imported synthesis line list"
    );
    Ok(entries.len())
}
