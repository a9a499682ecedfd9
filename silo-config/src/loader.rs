// Settings file formats

use crate::{ConfigError, Result};
use serde_json::Value;
use std::path::Path;

/// Formats a settings file may be written in, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `KEY=VALUE` lines using the same `SILO_*` names as the environment.
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            "env" => Some(Self::Env),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|s| s.to_str()).ok_or_else(|| {
            ConfigError::Read(format!("{} has no file extension", path.display()))
        })?;
        Self::from_extension(ext).ok_or_else(|| {
            ConfigError::Read(format!("unsupported settings format '.{}'", ext))
        })
    }

    /// Parse `content` into a JSON document. `.env` files become a flat object.
    pub fn parse(self, content: &str) -> Result<Value> {
        match self {
            Self::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("JSON: {}", e))),
            Self::Toml => {
                let doc: toml::Value = toml::from_str(content)
                    .map_err(|e| ConfigError::Parse(format!("TOML: {}", e)))?;
                serde_json::to_value(doc).map_err(|e| ConfigError::Parse(format!("TOML: {}", e)))
            }
            Self::Env => Ok(parse_env_lines(content)),
        }
    }
}

/// Read and parse a settings file, detecting the format from its extension.
pub fn read_file(path: &Path) -> Result<(FileFormat, Value)> {
    let format = FileFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
    Ok((format, format.parse(&content)?))
}

fn parse_env_lines(content: &str) -> Value {
    let pairs = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.strip_prefix("export ").unwrap_or(line))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), Value::String(value.to_string()))
        });
    Value::Object(pairs.collect())
}
