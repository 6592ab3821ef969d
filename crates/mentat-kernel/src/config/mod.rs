//! Configuration loading
//!
//! Engine configs are plain serde structs; this module layers a file
//! (YAML, TOML or JSON, detected from the extension) with environment
//! overrides and deserialises the result.
//!
//! Environment overrides use the `MENTAT` prefix and `__` as the nesting
//! separator, so `MENTAT__MAX_STEPS=4` overrides `max_steps`.

use crate::error::{KernelError, KernelResult};
use config::{Config as Cfg, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MENTAT";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Configuration error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Detect configuration format from file extension
///
/// Supported: `.yaml` / `.yml`, `.toml`, `.json`.
pub fn detect_format(path: &Path) -> Result<FileFormat, ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Load a typed configuration from a file, with environment overrides.
///
/// ```rust,ignore
/// use mentat_kernel::config::load_config;
///
/// let cfg: ReActConfig = load_config("react.toml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> KernelResult<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let format = detect_format(path)
        .map_err(|e| Report::new(KernelError::from(e)))
        .attach(format!("config file: {}", path.display()))?;

    let content = std::fs::read_to_string(path)
        .map_err(|e| Report::new(KernelError::from(e)))
        .attach(format!("reading {}", path.display()))?;

    tracing::debug!(path = %path.display(), ?format, "loading config");
    build(&content, format, true).attach(format!("config file: {}", path.display()))
}

/// Load a typed configuration from a string in the given format.
///
/// Environment overrides are not applied.
pub fn from_str<T>(content: &str, format: FileFormat) -> KernelResult<T>
where
    T: DeserializeOwned,
{
    build(content, format, false)
}

fn build<T>(content: &str, format: FileFormat, with_env: bool) -> KernelResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder().add_source(File::from_str(content, format));
    if with_env {
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );
    }

    let cfg = builder
        .build()
        .map_err(|e| Report::new(KernelError::from(ConfigError::Parse(e.to_string()))))?;

    cfg.try_deserialize().map_err(|e| {
        Report::new(KernelError::from(ConfigError::Serialization(e.to_string())))
    })
}
