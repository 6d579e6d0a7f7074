use super::{
    AbundanceError, AbundanceResult, ModelId, ModelStatus, SpectralModel, StellarParameters,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Indexed arena of every line model measured for one star.
///
/// Models are never removed once a run starts; rejection only clears the
/// acceptability flag, so tables can always be traced back to the full set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelPopulation {
    #[serde(default)]
    pub star: Option<String>,
    pub stellar_parameters: StellarParameters,
    #[serde(default)]
    pub correlation: Option<[[f64; 4]; 4]>,
    #[serde(default)]
    pub models: Vec<SpectralModel>,
}

impl ModelPopulation {
    pub fn new(stellar_parameters: StellarParameters) -> Self {
        Self {
            star: None,
            stellar_parameters,
            correlation: None,
            models: Vec::new(),
        }
    }

    pub fn push(&mut self, model: SpectralModel) -> ModelId {
        self.models.push(model);
        ModelId(self.models.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, id: ModelId) -> Option<&SpectralModel> {
        self.models.get(id.0)
    }

    pub fn get_mut(&mut self, id: ModelId) -> Option<&mut SpectralModel> {
        self.models.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelId, &SpectralModel)> {
        self.models
            .iter()
            .enumerate()
            .map(|(index, model)| (ModelId(index), model))
    }

    pub fn synthesis_ids(&self) -> Vec<ModelId> {
        self.iter()
            .filter(|(_, model)| model.is_synthesis())
            .map(|(id, _)| id)
            .collect()
    }

    /// Drops every synthesis model, returning how many were removed. Only
    /// valid before a run hands out `ModelId`s.
    pub fn clear_synthesis_models(&mut self) -> usize {
        let before = self.models.len();
        self.models.retain(|model| !model.is_synthesis());
        before - self.models.len()
    }

    pub fn statuses(&self) -> StatusSnapshot {
        StatusSnapshot(self.models.iter().map(|model| model.status).collect())
    }

    pub fn apply_statuses(&mut self, snapshot: &StatusSnapshot) -> AbundanceResult<()> {
        if snapshot.0.len() != self.models.len() {
            return Err(AbundanceError::internal(
                "SYS.STATUS_SNAPSHOT",
                format!(
                    "status snapshot covers {} models but the population holds {}",
                    snapshot.0.len(),
                    self.models.len()
                ),
            ));
        }
        for (model, status) in self.models.iter_mut().zip(&snapshot.0) {
            model.status = *status;
        }
        Ok(())
    }

    pub fn from_json_str(source: &str) -> AbundanceResult<Self> {
        serde_json::from_str(source).map_err(|source| {
            AbundanceError::input_validation(
                "INPUT.POPULATION_PARSE",
                format!("failed to parse model population: {}", source),
            )
        })
    }

    pub fn load_json(path: impl AsRef<Path>) -> AbundanceResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| {
            AbundanceError::io_system(
                "IO.POPULATION_READ",
                format!(
                    "failed to read model population '{}': {}",
                    path.display(),
                    source
                ),
            )
        })?;
        Self::from_json_str(&source)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> AbundanceResult<()> {
        let path = path.as_ref();
        let rendered = serde_json::to_string_pretty(self).map_err(|source| {
            AbundanceError::internal(
                "SYS.POPULATION_SERIALIZE",
                format!("failed to serialize model population: {}", source),
            )
        })?;
        fs::write(path, rendered).map_err(|source| {
            AbundanceError::io_system(
                "IO.POPULATION_WRITE",
                format!(
                    "failed to write model population '{}': {}",
                    path.display(),
                    source
                ),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot(Vec<ModelStatus>);

impl StatusSnapshot {
    pub fn get(&self, id: ModelId) -> Option<&ModelStatus> {
        self.0.get(id.0)
    }

    pub fn get_mut(&mut self, id: ModelId) -> Option<&mut ModelStatus> {
        self.0.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
