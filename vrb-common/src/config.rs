//! Configuration loading and resolution
//!
//! Each setting is resolved in priority order:
//! 1. Command-line argument or environment variable (merged by the CLI parser)
//! 2. TOML config file
//! 3. Compiled default (only for settings that have one)
//!
//! The result is a single [`ToolConfig`] built once at startup and handed to
//! the resolver, the pipeline jobs and the scheduler.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the interpreter used to run the separation model
pub const ENV_PYTHON_PATH: &str = "PYTHON_PATH";
/// Environment variable naming the separation toolkit root
pub const ENV_VOC_REMOVER_PATH: &str = "VOC_REMOVER_PATH";
/// Environment variable naming the converter executable
pub const ENV_CONVERTER_PATH: &str = "DB_POWER_AMP_PATH";
/// Environment variable switching on descriptor dumps and debug logging
pub const ENV_DEBUG: &str = "DEBUG";

pub const DEFAULT_GPU_INDEX: u32 = 1;
pub const DEFAULT_WINDOW_SIZE: u32 = 352;
pub const DEFAULT_MODEL_PARAMS: &str = "modelparams/2band_32000.json";
pub const DEFAULT_MODEL_WEIGHTS: &str = "models/MGM-v5-KAROKEE-32000-BETA1.pth";

/// Entrypoint script inside the separation toolkit root
pub const INFERENCE_SCRIPT: &str = "inference.py";
/// Output folder inside the separation toolkit root
pub const SEPARATED_DIR: &str = "separated";

/// Logging section of the TOML config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `vrb_batch=debug`
    pub level: Option<String>,
}

/// On-disk TOML configuration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub python_path: Option<PathBuf>,
    pub vocal_remover_path: Option<PathBuf>,
    pub converter_path: Option<PathBuf>,
    pub gpu_index: Option<u32>,
    pub window_size: Option<u32>,
    pub model_params: Option<PathBuf>,
    pub model_weights: Option<PathBuf>,
    pub logging: LoggingConfig,
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ToolOverrides {
    pub python_path: Option<PathBuf>,
    pub vocal_remover_path: Option<PathBuf>,
    pub converter_path: Option<PathBuf>,
    pub debug: bool,
}

/// Fixed parameters passed to the separation model
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationParams {
    pub gpu_index: u32,
    pub window_size: u32,
    /// Model parameter file, relative to the toolkit root
    pub model_params: PathBuf,
    /// Model weight file, relative to the toolkit root
    pub model_weights: PathBuf,
}

impl Default for SeparationParams {
    fn default() -> Self {
        Self {
            gpu_index: DEFAULT_GPU_INDEX,
            window_size: DEFAULT_WINDOW_SIZE,
            model_params: PathBuf::from(DEFAULT_MODEL_PARAMS),
            model_weights: PathBuf::from(DEFAULT_MODEL_WEIGHTS),
        }
    }
}

impl SeparationParams {
    /// Tag the separation model inserts into its output file names
    ///
    /// This is the weight file name without extension.
    pub fn model_tag(&self) -> String {
        self.model_weights
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Interpreter running the separation entrypoint
    pub python_path: PathBuf,
    /// Separation toolkit root (holds `inference.py`, `modelparams/`, `models/`)
    pub vocal_remover_path: PathBuf,
    /// Converter executable
    pub converter_path: PathBuf,
    pub debug: bool,
    pub separation: SeparationParams,
    pub logging: LoggingConfig,
}

impl ToolConfig {
    /// Merge overrides with an optional config file
    ///
    /// Fails with [`Error::Config`] when one of the external tool paths is
    /// missing from every source.
    pub fn resolve(overrides: &ToolOverrides, file: Option<&TomlConfig>) -> Result<Self> {
        let file_value = |pick: fn(&TomlConfig) -> Option<PathBuf>| file.and_then(pick);

        let python_path = required(
            overrides.python_path.clone(),
            file_value(|f| f.python_path.clone()),
            ENV_PYTHON_PATH,
            "python_path",
        )?;
        let vocal_remover_path = required(
            overrides.vocal_remover_path.clone(),
            file_value(|f| f.vocal_remover_path.clone()),
            ENV_VOC_REMOVER_PATH,
            "vocal_remover_path",
        )?;
        let converter_path = required(
            overrides.converter_path.clone(),
            file_value(|f| f.converter_path.clone()),
            ENV_CONVERTER_PATH,
            "converter_path",
        )?;

        let defaults = SeparationParams::default();
        let separation = SeparationParams {
            gpu_index: file.and_then(|f| f.gpu_index).unwrap_or(defaults.gpu_index),
            window_size: file.and_then(|f| f.window_size).unwrap_or(defaults.window_size),
            model_params: file_value(|f| f.model_params.clone()).unwrap_or(defaults.model_params),
            model_weights: file_value(|f| f.model_weights.clone())
                .unwrap_or(defaults.model_weights),
        };

        let logging = file.map(|f| f.logging.clone()).unwrap_or_default();

        Ok(Self {
            python_path,
            vocal_remover_path,
            converter_path,
            debug: overrides.debug,
            separation,
            logging,
        })
    }

    /// Absolute path of the separation entrypoint
    pub fn inference_script(&self) -> PathBuf {
        self.vocal_remover_path.join(INFERENCE_SCRIPT)
    }

    /// Root under which intermediates and final outputs are written
    pub fn separated_root(&self) -> PathBuf {
        self.vocal_remover_path.join(SEPARATED_DIR)
    }
}

fn required(
    primary: Option<PathBuf>,
    fallback: Option<PathBuf>,
    env_var: &str,
    toml_key: &str,
) -> Result<PathBuf> {
    primary
        .or(fallback)
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "{} not configured. Set the {} environment variable or `{}` in the config file",
                toml_key, env_var, toml_key
            ))
        })
}

/// Default config file location: `<config dir>/vrb/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vrb").join("config.toml"))
}

/// Load a TOML config file
///
/// A missing file is not an error: it yields `None` so the caller falls back
/// to other sources, and reports it once logging is up. A file that exists
/// but cannot be read or parsed is an error.
pub fn load_toml_config(path: &Path) -> Result<Option<TomlConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    debug!("Loaded config file: {}", path.display());
    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides() -> ToolOverrides {
        ToolOverrides {
            python_path: Some(PathBuf::from("/usr/bin/python3")),
            vocal_remover_path: Some(PathBuf::from("/opt/vocal-remover")),
            converter_path: Some(PathBuf::from("/opt/converter/coreconverter")),
            debug: false,
        }
    }

    #[test]
    fn test_model_tag_from_weights() {
        let params = SeparationParams::default();
        assert_eq!(params.model_tag(), "MGM-v5-KAROKEE-32000-BETA1");
    }

    #[test]
    fn test_derived_paths() {
        let config = ToolConfig::resolve(&overrides(), None).unwrap();
        assert_eq!(
            config.inference_script(),
            PathBuf::from("/opt/vocal-remover/inference.py")
        );
        assert_eq!(
            config.separated_root(),
            PathBuf::from("/opt/vocal-remover/separated")
        );
    }

    #[test]
    fn test_empty_path_counts_as_missing() {
        let mut o = overrides();
        o.converter_path = Some(PathBuf::new());
        let err = ToolConfig::resolve(&o, None).unwrap_err();
        assert!(err.to_string().contains(ENV_CONVERTER_PATH));
    }
}
