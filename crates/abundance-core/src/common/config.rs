use crate::domain::AbundanceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub output_name: String,
    pub output_directory: PathBuf,
    #[serde(alias = "run_synth_fit")]
    pub synthesis: SynthesisFitConfig,
    #[serde(alias = "run_summary")]
    pub summary: SummaryConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_name: "star".to_string(),
            output_directory: PathBuf::from("."),
            synthesis: SynthesisFitConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisFitConfig {
    pub max_fwhm: f64,
    #[serde(alias = "synthesis_linelist_fname")]
    pub synthesis_linelist: Option<PathBuf>,
    #[serde(alias = "extra_synthesis_linelist_fname")]
    pub extra_synthesis_linelist: Option<PathBuf>,
    /// Passes per prior phase; the loop runs this many passes twice.
    #[serde(alias = "num_iter_all")]
    pub passes: usize,
    #[serde(alias = "smooth_approx")]
    pub smooth_target: f64,
    pub smooth_scale: f64,
    #[serde(alias = "max_iter_each")]
    pub max_fit_iterations: usize,
    #[serde(alias = "clear_all_existing_syntheses")]
    pub clear_existing_syntheses: bool,
    pub detection_sigma: f64,
    pub upper_limit_sigma: f64,
    pub alpha_anchor_clip: f64,
    pub rprocess_anchor_clip: f64,
}

impl Default for SynthesisFitConfig {
    fn default() -> Self {
        Self {
            max_fwhm: 1.0,
            synthesis_linelist: None,
            extra_synthesis_linelist: None,
            passes: 2,
            smooth_target: 0.1,
            smooth_scale: 0.1,
            max_fit_iterations: 5,
            clear_existing_syntheses: false,
            detection_sigma: 3.0,
            upper_limit_sigma: 5.0,
            alpha_anchor_clip: 0.4,
            rprocess_anchor_clip: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystematicMode {
    #[default]
    Default,
    Estimated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryWeighting {
    #[default]
    Uniform,
    InverseVariance,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SummaryConfig {
    #[serde(alias = "summary_output_dir")]
    pub output_dir: Option<PathBuf>,
    pub output_suffix: String,
    pub quick_no_errors: bool,
    #[serde(alias = "minerr")]
    pub min_stat_error: f64,
    #[serde(alias = "default_esys")]
    pub default_systematic_error: f64,
    pub systematic_mode: SystematicMode,
    pub weighting: SummaryWeighting,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            output_suffix: "summary".to_string(),
            quick_no_errors: false,
            min_stat_error: 0.001,
            default_systematic_error: 0.1,
            systematic_mode: SystematicMode::Default,
            weighting: SummaryWeighting::Uniform,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let synthesis = &self.synthesis;
        let summary = &self.summary;

        if self.output_name.trim().is_empty() {
            return Err(ConfigError::invalid("output_name", "must not be empty"));
        }
        require_positive("synthesis.max_fwhm", synthesis.max_fwhm)?;
        require_positive("synthesis.smooth_scale", synthesis.smooth_scale)?;
        require_finite("synthesis.smooth_target", synthesis.smooth_target)?;
        require_positive("synthesis.detection_sigma", synthesis.detection_sigma)?;
        require_positive("synthesis.upper_limit_sigma", synthesis.upper_limit_sigma)?;
        require_non_negative("synthesis.alpha_anchor_clip", synthesis.alpha_anchor_clip)?;
        require_non_negative(
            "synthesis.rprocess_anchor_clip",
            synthesis.rprocess_anchor_clip,
        )?;
        if synthesis.max_fit_iterations == 0 {
            return Err(ConfigError::invalid(
                "synthesis.max_fit_iterations",
                "must be at least 1",
            ));
        }
        require_non_negative("summary.min_stat_error", summary.min_stat_error)?;
        require_non_negative(
            "summary.default_systematic_error",
            summary.default_systematic_error,
        )?;
        Ok(())
    }

    pub fn summary_output_dir(&self) -> &Path {
        self.summary
            .output_dir
            .as_deref()
            .unwrap_or(&self.output_directory)
    }

    pub fn line_table_path(&self) -> PathBuf {
        self.summary_output_dir().join(format!(
            "{}_{}_lines.txt",
            self.output_name, self.summary.output_suffix
        ))
    }

    pub fn summary_table_path(&self) -> PathBuf {
        self.summary_output_dir().join(format!(
            "{}_{}_abunds.txt",
            self.output_name, self.summary.output_suffix
        ))
    }
}

fn require_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be finite"))
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be a positive number"))
    }
}

fn require_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be a non-negative number"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read run config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse run config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid run config value '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

impl From<ConfigError> for AbundanceError {
    fn from(error: ConfigError) -> Self {
        match &error {
            ConfigError::Read { .. } => AbundanceError::io_system("IO.CONFIG_READ", error.to_string()),
            ConfigError::Parse { .. } => {
                AbundanceError::input_validation("INPUT.CONFIG_PARSE", error.to_string())
            }
            ConfigError::Invalid { .. } => {
                AbundanceError::input_validation("INPUT.CONFIG_VALUE", error.to_string())
            }
        }
    }
}

pub fn load_run_config(config_path: impl AsRef<Path>) -> Result<RunConfig, ConfigError> {
    let config_path = config_path.as_ref();
    let source = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    let config: RunConfig =
        serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}
